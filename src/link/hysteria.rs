use url::Url;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{
    fragment_suffix, non_empty, percent_decode, percent_encode, query_get, query_map,
    query_suffix, split_alpn, LinkCodec,
};

/// `hy://auth@host:port?peer=&alpn=&upmbps=&downmbps=#name`
pub struct HysteriaCodec;

impl LinkCodec for HysteriaCodec {
    fn scheme(&self) -> &'static str {
        "hy"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["hysteria"]
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let url = Url::parse(uri).map_err(|e| ParseError::MalformedUri(e.to_string()))?;
        let server = url
            .host_str()
            .ok_or(ParseError::MissingField("server"))?
            .to_string();
        let port = url.port().ok_or(ParseError::MissingField("port"))?;
        let query = query_map(&url);
        let get = |key: &str| query_get(&query, key);

        Ok(Proxy {
            name: url.fragment().map(percent_decode).unwrap_or_default(),
            kind: "hysteria".into(),
            server,
            port,
            auth_str: non_empty(percent_decode(url.username())),
            peer: non_empty(get("peer")),
            up: parse_rate(&get("upmbps"))?,
            down: parse_rate(&get("downmbps"))?,
            alpn: split_alpn(&query),
            ..Default::default()
        })
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }
        let pairs = [
            ("peer", proxy.peer.clone().unwrap_or_default()),
            ("alpn", proxy.alpn.join(",")),
            ("upmbps", proxy.up.map(|v| v.to_string()).unwrap_or_default()),
            (
                "downmbps",
                proxy.down.map(|v| v.to_string()).unwrap_or_default(),
            ),
        ];
        Ok(format!(
            "hy://{}@{}:{}{}{}",
            percent_encode(proxy.auth_str.as_deref().unwrap_or_default()),
            proxy.server,
            proxy.port,
            query_suffix(&pairs),
            fragment_suffix(&proxy.name)
        ))
    }
}

/// Mbps values are plain integers; empty means unset.
fn parse_rate(value: &str) -> Result<Option<i64>, ParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ParseError::MalformedUri(format!("invalid rate: {value:?}")))
}
