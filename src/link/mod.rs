//! Bidirectional conversion between proxy URIs and [`Proxy`] records.
//!
//! One codec per scheme, dispatched through a registry keyed by the URI
//! prefix. Decoders are tolerant of the base64 variants seen in real
//! subscriptions; encoders emit the canonical shape for each scheme.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::ParseError;
use crate::models::Proxy;

mod hysteria;
mod hysteria2;
mod ss;
mod ssr;
mod trojan;
mod tuic;
mod vless;
mod vmess;

pub use hysteria::HysteriaCodec;
pub use hysteria2::Hysteria2Codec;
pub use ss::SsCodec;
pub use ssr::SsrCodec;
pub use trojan::TrojanCodec;
pub use tuic::TuicCodec;
pub use vless::VlessCodec;
pub use vmess::VmessCodec;

/// Encoder/decoder pair for one proxy-URI scheme.
pub trait LinkCodec: Sync {
    /// Canonical scheme prefix, without `://`.
    fn scheme(&self) -> &'static str;

    /// Accepted alternate prefixes (e.g. `hysteria` for `hy`).
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError>;

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError>;
}

static CODECS: &[&dyn LinkCodec] = &[
    &SsCodec,
    &SsrCodec,
    &VmessCodec,
    &VlessCodec,
    &TrojanCodec,
    &HysteriaCodec,
    &Hysteria2Codec,
    &TuicCodec,
];

/// Looks up the codec handling `scheme`, accepting aliases.
pub fn codec_for_scheme(scheme: &str) -> Option<&'static dyn LinkCodec> {
    CODECS
        .iter()
        .copied()
        .find(|c| c.scheme() == scheme || c.aliases().contains(&scheme))
}

/// Decodes any supported proxy URI into a [`Proxy`] record.
pub fn decode(uri: &str) -> Result<Proxy, ParseError> {
    let uri = uri.trim();
    let scheme = uri
        .split_once("://")
        .map(|(s, _)| s)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::MalformedUri("missing scheme separator".into()))?;
    let codec = codec_for_scheme(scheme)
        .ok_or_else(|| ParseError::UnsupportedScheme(scheme.to_string()))?;
    codec.decode(uri)
}

/// Encodes a [`Proxy`] record back into its scheme's canonical URI. The
/// record's `type` selects the codec; `hysteria`/`hysteria2` map onto the
/// `hy`/`hy2` prefixes.
pub fn encode(proxy: &Proxy) -> Result<String, ParseError> {
    let codec = codec_for_scheme(&proxy.kind)
        .ok_or_else(|| ParseError::UnsupportedScheme(proxy.kind.clone()))?;
    codec.encode(proxy)
}

/// Whether a line starts with one of the supported scheme prefixes.
pub fn is_proxy_link(line: &str) -> bool {
    line.split_once("://")
        .map(|(scheme, _)| codec_for_scheme(scheme).is_some())
        .unwrap_or(false)
}

/// Base64 decode accepting both alphabets, with and without padding.
/// Interior whitespace is stripped first, as subscriptions routinely wrap
/// their payloads.
pub(crate) fn decode_base64(input: &str) -> Result<Vec<u8>, ParseError> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(ParseError::BadBase64);
    }
    for engine in [&STANDARD, &URL_SAFE] {
        if let Ok(decoded) = engine.decode(&cleaned) {
            return Ok(decoded);
        }
    }
    for engine in [&STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(decoded) = engine.decode(cleaned.trim_end_matches('=')) {
            return Ok(decoded);
        }
    }
    Err(ParseError::BadBase64)
}

/// [`decode_base64`] constrained to valid UTF-8 output.
pub(crate) fn decode_base64_text(input: &str) -> Result<String, ParseError> {
    let bytes = decode_base64(input)?;
    String::from_utf8(bytes).map_err(|_| ParseError::BadBase64)
}

/// Splits a trailing `#fragment` off and percent-decodes it.
pub(crate) fn split_fragment(rest: &str) -> (&str, String) {
    match rest.rfind('#') {
        Some(pos) => (&rest[..pos], percent_decode(&rest[pos + 1..])),
        None => (rest, String::new()),
    }
}

pub(crate) fn percent_decode(input: &str) -> String {
    urlencoding::decode(input)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

pub(crate) fn percent_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Splits `host:port`, keeping IPv6 brackets on the host intact.
pub(crate) fn parse_host_port(input: &str) -> Result<(String, u16), ParseError> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| ParseError::MalformedUri(format!("missing port in {input:?}")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ParseError::MalformedUri(format!("invalid port in {input:?}")))?;
    if host.is_empty() {
        return Err(ParseError::MalformedUri(format!("missing host in {input:?}")));
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Fragment-encoded name suffix, empty when the name is empty.
pub(crate) fn fragment_suffix(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("#{}", percent_encode(name))
    }
}

/// Query pairs of a parsed URL, percent-decoded, in document order.
pub(crate) fn query_map(url: &url::Url) -> Vec<(String, String)> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Query keys are case-sensitive; absent keys read as empty.
pub(crate) fn query_get(query: &[(String, String)], key: &str) -> String {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

/// Collects `alpn` values, splitting comma-joined and repeated parameters.
pub(crate) fn split_alpn(query: &[(String, String)]) -> Vec<String> {
    query
        .iter()
        .filter(|(k, _)| k == "alpn")
        .flat_map(|(_, v)| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Reads a string entry out of an optional opts map.
pub(crate) fn opt_str(
    opts: &Option<serde_json::Map<String, serde_json::Value>>,
    key: &str,
) -> String {
    opts.as_ref()
        .and_then(|o| o.get(key))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Joins `key=value` pairs into a query suffix, skipping empty values.
pub(crate) fn query_suffix(pairs: &[(&str, String)]) -> String {
    let joined: Vec<String> = pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
        .collect();
    if joined.is_empty() {
        String::new()
    } else {
        format!("?{}", joined.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_accepts_all_variants() {
        // "aes-256-gcm:pass" in each alphabet, padded and not
        let expected = b"aes-256-gcm:pass".to_vec();
        for input in ["YWVzLTI1Ni1nY206cGFzcw==", "YWVzLTI1Ni1nY206cGFzcw"] {
            assert_eq!(decode_base64(input).unwrap(), expected, "{input}");
        }
        // URL-safe alphabet ('_' in place of '/'), and standard without padding
        assert_eq!(decode_base64("Pz8_Pw==").unwrap(), b"????".to_vec());
        assert_eq!(decode_base64("Pz8/Pw").unwrap(), b"????".to_vec());
    }

    #[test]
    fn base64_strips_interior_whitespace() {
        assert_eq!(
            decode_base64("YWVzLTI1Ni1nY2\n06cGFzcw==").unwrap(),
            b"aes-256-gcm:pass".to_vec()
        );
    }

    #[test]
    fn base64_rejects_garbage() {
        assert_eq!(decode_base64("not base64 at all!"), Err(ParseError::BadBase64));
    }

    #[test]
    fn scheme_dispatch_covers_aliases() {
        assert!(codec_for_scheme("hy").is_some());
        assert!(codec_for_scheme("hysteria").is_some());
        assert!(codec_for_scheme("hy2").is_some());
        assert!(codec_for_scheme("hysteria2").is_some());
        assert!(codec_for_scheme("socks5").is_none());
    }

    #[test]
    fn unknown_scheme_is_reported() {
        let err = decode("socks5://a@b:1").unwrap_err();
        assert_eq!(err, ParseError::UnsupportedScheme("socks5".into()));
        let err = decode("no-separator").unwrap_err();
        assert!(matches!(err, ParseError::MalformedUri(_)));
    }

    #[test]
    fn proxy_link_filter() {
        assert!(is_proxy_link("ss://abc"));
        assert!(is_proxy_link("hysteria2://a@b:1"));
        assert!(!is_proxy_link("https://example.com"));
        assert!(!is_proxy_link("# comment"));
    }

    #[test]
    fn host_port_handles_ipv6() {
        assert_eq!(
            parse_host_port("[2001:db8::1]:443").unwrap(),
            ("2001:db8::1".to_string(), 443)
        );
        assert!(parse_host_port("host").is_err());
        assert!(parse_host_port("host:notaport").is_err());
    }
}
