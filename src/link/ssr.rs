use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{decode_base64_text, LinkCodec};

/// `ssr://base64url(host:port:protocol:cipher:obfs:base64url(password)/?remarks=…&obfsparam=…&protoparam=…)`
///
/// The whole payload is base64; remarks, obfsparam, and protoparam are each
/// base64 again inside the query string.
pub struct SsrCodec;

impl LinkCodec for SsrCodec {
    fn scheme(&self) -> &'static str {
        "ssr"
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let rest = uri
            .strip_prefix("ssr://")
            .ok_or_else(|| ParseError::MalformedUri(uri.to_string()))?;
        let payload = decode_base64_text(rest)?;

        let (main, query) = match payload.split_once("/?") {
            Some((main, query)) => (main, query),
            None => (payload.as_str(), ""),
        };

        // host may itself contain colons (IPv6), so split from the right
        let mut parts = main.rsplitn(6, ':');
        let password_b64 = parts.next().unwrap_or_default();
        let obfs = parts.next().ok_or(ParseError::MissingField("obfs"))?;
        let cipher = parts.next().ok_or(ParseError::MissingField("cipher"))?;
        let protocol = parts.next().ok_or(ParseError::MissingField("protocol"))?;
        let port = parts.next().ok_or(ParseError::MissingField("port"))?;
        let server = parts.next().ok_or(ParseError::MissingField("server"))?;

        let port = port
            .parse::<u16>()
            .map_err(|_| ParseError::MalformedUri(format!("invalid port in {main:?}")))?;
        let password = decode_base64_text(password_b64)?;

        let mut remarks = String::new();
        let mut obfsparam = String::new();
        let mut protoparam = String::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decoded = if value.is_empty() {
                String::new()
            } else {
                decode_base64_text(value)?
            };
            match key {
                "remarks" => remarks = decoded,
                "obfsparam" => obfsparam = decoded,
                "protoparam" => protoparam = decoded,
                _ => {}
            }
        }

        Ok(Proxy {
            name: remarks,
            kind: "ssr".into(),
            server: server.to_string(),
            port,
            cipher: Some(cipher.to_string()),
            password: Some(password),
            protocol: Some(protocol.to_string()),
            obfs: Some(obfs.to_string()),
            obfs_password: (!obfsparam.is_empty()).then_some(obfsparam),
            protocol_param: (!protoparam.is_empty()).then_some(protoparam),
            ..Default::default()
        })
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }
        let cipher = proxy.cipher.as_deref().ok_or(ParseError::MissingField("cipher"))?;
        let password = proxy
            .password
            .as_deref()
            .ok_or(ParseError::MissingField("password"))?;

        let mut content = format!(
            "{}:{}:{}:{}:{}:{}",
            proxy.server,
            proxy.port,
            proxy.protocol.as_deref().unwrap_or("origin"),
            cipher,
            proxy.obfs.as_deref().unwrap_or("plain"),
            URL_SAFE.encode(password)
        );

        let mut params = Vec::new();
        if !proxy.name.is_empty() {
            params.push(format!("remarks={}", URL_SAFE.encode(&proxy.name)));
        }
        if let Some(obfsparam) = proxy.obfs_password.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("obfsparam={}", URL_SAFE.encode(obfsparam)));
        }
        if let Some(protoparam) = proxy.protocol_param.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("protoparam={}", URL_SAFE.encode(protoparam)));
        }
        if !params.is_empty() {
            content.push_str("/?");
            content.push_str(&params.join("&"));
        }

        Ok(format!("ssr://{}", URL_SAFE.encode(content)))
    }
}
