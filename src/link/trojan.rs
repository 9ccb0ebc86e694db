use serde_json::{Map, Value};
use url::Url;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{
    fragment_suffix, non_empty, opt_str, percent_decode, percent_encode, query_get, query_map,
    query_suffix, split_alpn, LinkCodec,
};

/// `trojan://password@host:port?sni=&type=&flow=&alpn=&fp=&path=&host=#name`
///
/// `alpn` values may arrive comma-joined or as repeated parameters.
pub struct TrojanCodec;

impl LinkCodec for TrojanCodec {
    fn scheme(&self) -> &'static str {
        "trojan"
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let url = Url::parse(uri).map_err(|e| ParseError::MalformedUri(e.to_string()))?;
        let password = percent_decode(url.username());
        if password.is_empty() {
            return Err(ParseError::MissingField("password"));
        }
        let server = url
            .host_str()
            .ok_or(ParseError::MissingField("server"))?
            .to_string();
        let port = url.port().ok_or(ParseError::MissingField("port"))?;
        let query = query_map(&url);
        let get = |key: &str| query_get(&query, key);

        let network = get("type");
        let mut proxy = Proxy {
            name: url.fragment().map(percent_decode).unwrap_or_default(),
            kind: "trojan".into(),
            server,
            port,
            password: Some(password),
            sni: non_empty(get("sni")),
            network: non_empty(network.clone()),
            flow: non_empty(get("flow")),
            client_fingerprint: non_empty(get("fp")),
            alpn: split_alpn(&query),
            ..Default::default()
        };

        if network == "ws" {
            let mut ws_opts = Map::new();
            ws_opts.insert("path".into(), Value::String(get("path")));
            let mut headers = Map::new();
            headers.insert("Host".into(), Value::String(get("host")));
            ws_opts.insert("headers".into(), Value::Object(headers));
            proxy.ws_opts = Some(ws_opts);
        }
        proxy.normalize_opts();
        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }
        let password = proxy
            .password
            .as_deref()
            .ok_or(ParseError::MissingField("password"))?;

        let ws_host = proxy
            .ws_opts
            .as_ref()
            .and_then(|o| o.get("headers"))
            .and_then(Value::as_object)
            .and_then(|h| h.get("Host"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let pairs = [
            ("sni", proxy.sni.clone().unwrap_or_default()),
            ("type", proxy.network.clone().unwrap_or_default()),
            ("flow", proxy.flow.clone().unwrap_or_default()),
            ("alpn", proxy.alpn.join(",")),
            ("fp", proxy.client_fingerprint.clone().unwrap_or_default()),
            ("path", opt_str(&proxy.ws_opts, "path")),
            ("host", ws_host),
        ];

        Ok(format!(
            "trojan://{}@{}:{}{}{}",
            percent_encode(password),
            proxy.server,
            proxy.port,
            query_suffix(&pairs),
            fragment_suffix(&proxy.name)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_uri() {
        let proxy = TrojanCodec.decode("trojan://pw@ex.com:443#ex").unwrap();
        assert_eq!(proxy.kind, "trojan");
        assert_eq!(proxy.password.as_deref(), Some("pw"));
        assert_eq!(proxy.server, "ex.com");
        assert_eq!(proxy.port, 443);
        assert_eq!(proxy.name, "ex");
    }

    #[test]
    fn alpn_accepts_comma_and_repeat_delimiters() {
        let comma = TrojanCodec
            .decode("trojan://p@h.com:443?alpn=h2,http%2F1.1#n")
            .unwrap();
        let repeated = TrojanCodec
            .decode("trojan://p@h.com:443?alpn=h2&alpn=http%2F1.1#n")
            .unwrap();
        assert_eq!(comma.alpn, vec!["h2", "http/1.1"]);
        assert_eq!(comma.alpn, repeated.alpn);
    }

    #[test]
    fn ws_parameters_group_into_opts() {
        let proxy = TrojanCodec
            .decode("trojan://p@h.com:443?type=ws&sni=s.com&path=%2Fws&host=cdn.com&fp=chrome#n")
            .unwrap();
        assert_eq!(proxy.sni.as_deref(), Some("s.com"));
        assert_eq!(proxy.client_fingerprint.as_deref(), Some("chrome"));
        let ws_opts = proxy.ws_opts.as_ref().unwrap();
        assert_eq!(ws_opts["path"], "/ws");
        assert_eq!(ws_opts["headers"]["Host"], "cdn.com");
    }

    #[test]
    fn round_trip() {
        let uri = "trojan://p%40ss@h.com:443?sni=s.com&type=ws&alpn=h2,http%2F1.1&path=%2Fws#Node%20A";
        let first = TrojanCodec.decode(uri).unwrap();
        let emitted = TrojanCodec.encode(&first).unwrap();
        assert_eq!(TrojanCodec.decode(&emitted).unwrap(), first);
    }

    #[test]
    fn missing_password_is_reported() {
        assert_eq!(
            TrojanCodec.decode("trojan://h.com:443"),
            Err(ParseError::MissingField("password"))
        );
    }
}
