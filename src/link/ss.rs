use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{
    decode_base64_text, fragment_suffix, parse_host_port, percent_decode, split_fragment,
    LinkCodec,
};

/// `ss://base64(cipher:password)@host:port#name`
///
/// The plain SIP002 userinfo form (`cipher:password@…`) is accepted on
/// decode as well; emission always base64-encodes the userinfo.
pub struct SsCodec;

impl LinkCodec for SsCodec {
    fn scheme(&self) -> &'static str {
        "ss"
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let rest = uri
            .strip_prefix("ss://")
            .ok_or_else(|| ParseError::MalformedUri(uri.to_string()))?;
        let (main, name) = split_fragment(rest);

        let (userinfo, hostport) = main
            .rsplit_once('@')
            .ok_or_else(|| ParseError::MalformedUri("missing @ in ss URI".into()))?;
        let (server, port) = parse_host_port(hostport)?;

        let userinfo = if userinfo.contains(':') {
            percent_decode(userinfo)
        } else {
            decode_base64_text(userinfo)?
        };
        let (cipher, password) = userinfo
            .split_once(':')
            .ok_or(ParseError::MissingField("password"))?;

        Ok(Proxy {
            name,
            kind: "ss".into(),
            server,
            port,
            cipher: Some(cipher.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        })
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        let cipher = proxy.cipher.as_deref().ok_or(ParseError::MissingField("cipher"))?;
        let password = proxy
            .password
            .as_deref()
            .ok_or(ParseError::MissingField("password"))?;
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }

        let userinfo = STANDARD.encode(format!("{cipher}:{password}"));
        Ok(format!(
            "ss://{}@{}:{}{}",
            userinfo,
            proxy.server,
            proxy.port,
            fragment_suffix(&proxy.name)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_userinfo() {
        let proxy = SsCodec
            .decode("ss://YWVzLTI1Ni1nY206cGFzcw==@1.1.1.1:8388#Hello")
            .unwrap();
        assert_eq!(proxy.kind, "ss");
        assert_eq!(proxy.server, "1.1.1.1");
        assert_eq!(proxy.port, 8388);
        assert_eq!(proxy.cipher.as_deref(), Some("aes-256-gcm"));
        assert_eq!(proxy.password.as_deref(), Some("pass"));
        assert_eq!(proxy.name, "Hello");
    }

    #[test]
    fn decodes_plain_userinfo_and_encoded_fragment() {
        let proxy = SsCodec
            .decode("ss://aes-128-gcm:p%40ss@host.example:443#My%20Node")
            .unwrap();
        assert_eq!(proxy.cipher.as_deref(), Some("aes-128-gcm"));
        assert_eq!(proxy.password.as_deref(), Some("p@ss"));
        assert_eq!(proxy.name, "My Node");
    }

    #[test]
    fn encode_matches_canonical_shape() {
        let proxy = Proxy {
            name: "n1".into(),
            kind: "ss".into(),
            server: "s".into(),
            port: 1234,
            cipher: Some("aes-128-gcm".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(
            SsCodec.encode(&proxy).unwrap(),
            "ss://YWVzLTEyOC1nY206cA==@s:1234#n1"
        );
    }

    #[test]
    fn round_trip() {
        let uri = "ss://YWVzLTI1Ni1nY206cGFzcw==@1.1.1.1:8388#Hello";
        let first = SsCodec.decode(uri).unwrap();
        let emitted = SsCodec.encode(&first).unwrap();
        assert_eq!(SsCodec.decode(&emitted).unwrap(), first);
    }

    #[test]
    fn missing_at_is_malformed() {
        assert!(matches!(
            SsCodec.decode("ss://YWVzLTI1Ni1nY206cGFzcw=="),
            Err(ParseError::MalformedUri(_))
        ));
    }
}
