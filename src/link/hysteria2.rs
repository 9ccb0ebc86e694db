use url::Url;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{
    fragment_suffix, non_empty, percent_decode, percent_encode, query_get, query_map,
    query_suffix, split_alpn, LinkCodec,
};

/// `hy2://auth@host:port?sni=&alpn=&obfs=&obfs-password=#name`
///
/// An explicit `password` parameter, when present, is carried separately
/// from the userinfo auth string.
pub struct Hysteria2Codec;

impl LinkCodec for Hysteria2Codec {
    fn scheme(&self) -> &'static str {
        "hy2"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["hysteria2"]
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
            kind: "hysteria2".into(),
            server,
            port,
            auth_str: non_empty(percent_decode(url.username())),
            password: non_empty(get("password")),
            sni: non_empty(get("sni")),
            obfs: non_empty(get("obfs")),
            obfs_password: non_empty(get("obfs-password")),
            alpn: split_alpn(&query),
            ..Default::default()
        })
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }
        let pairs = [
            ("sni", proxy.sni.clone().unwrap_or_default()),
            ("alpn", proxy.alpn.join(",")),
            ("obfs", proxy.obfs.clone().unwrap_or_default()),
            (
                "obfs-password",
                proxy.obfs_password.clone().unwrap_or_default(),
            ),
            ("password", proxy.password.clone().unwrap_or_default()),
        ];
        Ok(format!(
            "hy2://{}@{}:{}{}{}",
            percent_encode(proxy.auth_str.as_deref().unwrap_or_default()),
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
    fn decodes_obfs_parameters() {
        let proxy = Hysteria2Codec
            .decode("hy2://auth@h.com:443?sni=s.com&obfs=salamander&obfs-password=op&alpn=h3#HY2")
            .unwrap();
        assert_eq!(proxy.kind, "hysteria2");
        assert_eq!(proxy.auth_str.as_deref(), Some("auth"));
        assert_eq!(proxy.obfs.as_deref(), Some("salamander"));
        assert_eq!(proxy.obfs_password.as_deref(), Some("op"));
        assert_eq!(proxy.sni.as_deref(), Some("s.com"));
        assert!(proxy.password.is_none());
    }

    #[test]
    fn explicit_password_is_kept_separate_from_auth() {
        let proxy = Hysteria2Codec
            .decode("hy2://auth@h.com:443?password=pw#n")
            .unwrap();
        assert_eq!(proxy.auth_str.as_deref(), Some("auth"));
        assert_eq!(proxy.password.as_deref(), Some("pw"));
    }

    #[test]
    fn hysteria2_alias_dispatches() {
        let proxy = super::super::decode("hysteria2://a@h.com:443#n").unwrap();
        assert_eq!(proxy.kind, "hysteria2");
    }

    #[test]
    fn round_trip() {
        let uri = "hy2://auth@h.com:443?sni=s.com&obfs=salamander&obfs-password=op#HY2";
        let first = Hysteria2Codec.decode(uri).unwrap();
        let emitted = Hysteria2Codec.encode(&first).unwrap();
        assert_eq!(Hysteria2Codec.decode(&emitted).unwrap(), first);
    }
}
