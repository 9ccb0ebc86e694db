use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::Client;
use tracing::{debug, warn};

use crate::clash;
use crate::error::Result;
use crate::link;
use crate::models::Subscription;

/// One raw proxy descriptor pulled out of a subscription payload: the
/// canonical link, plus the original Clash map (as JSON) and its `name`
/// when the payload was a Clash document.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub link: String,
    pub config: Option<String>,
    pub name_hint: Option<String>,
}

/// Downloads subscription payloads and demangles them into raw proxy
/// descriptors.
pub struct SubscriptionFetcher {
    client: Client,
}

impl SubscriptionFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Fetches a subscription body and parses it. Only network failures
    /// are errors; an empty result is the caller's to judge.
    pub async fn fetch(&self, subscription: &Subscription) -> Result<Vec<RawNode>> {
        let response = self
            .client
            .get(&subscription.url)
            .header(USER_AGENT, subscription.user_agent.as_str())
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        debug!(
            subscription = %subscription.name,
            bytes = body.len(),
            "fetched subscription body"
        );
        Ok(parse_payload(&body))
    }
}

impl Default for SubscriptionFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a subscription body: strips a whole-body base64 layer when one
/// is present, then takes either the Clash path or the line-delimited path.
pub fn parse_payload(body: &str) -> Vec<RawNode> {
    let content = demangle(body);

    if let Some(maps) = clash::document_proxies(&content) {
        let mut nodes = Vec::with_capacity(maps.len());
        for map in maps {
            let link = match clash::proxy_map_to_link(&map) {
                Ok(link) => link,
                Err(e) => {
                    warn!("skipping proxies entry: {e}");
                    continue;
                }
            };
            let name_hint = map
                .get("name")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let config = serde_json::to_string(&map).ok();
            nodes.push(RawNode {
                link,
                config,
                name_hint,
            });
        }
        return nodes;
    }

    body_lines(&content)
        .map(|line| RawNode {
            link: line.to_string(),
            config: None,
            name_hint: None,
        })
        .collect()
}

/// A body that decodes as base64 into valid UTF-8 is replaced by the
/// decoded text; anything else is passed through unchanged.
fn demangle(body: &str) -> String {
    match link::decode_base64_text(body) {
        Ok(text) => text,
        Err(_) => body.to_string(),
    }
}

fn body_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| link::is_proxy_link(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    const VMESS_SEED: &str = "vmess://eyJ2IjoiMiIsInBzIjoiVGVzdCIsImFkZCI6IjEuMi4zLjQiLCJwb3J0IjoiNDQzIiwiaWQiOiJhYWFhYWFhYS1iYmJiLWNjY2MtZGRkZC1lZWVlZWVlZWVlZWUiLCJhaWQiOiIwIiwibmV0Ijoid3MiLCJob3N0IjoiaC5jb20iLCJwYXRoIjoiL3AiLCJ0bHMiOiJ0bHMifQ==";

    #[test]
    fn line_delimited_body_keeps_known_schemes_only() {
        let body = format!(
            "{VMESS_SEED}\n# a comment\n\ntrojan://pw@ex.com:443#ex\nhttps://not-a-proxy.example\n"
        );
        let nodes = parse_payload(&body);
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].link.starts_with("vmess://"));
        assert_eq!(nodes[1].link, "trojan://pw@ex.com:443#ex");
        assert!(nodes[0].config.is_none());
    }

    #[test]
    fn base64_wrapped_body_is_unwrapped() {
        let inner = "ss://YWVzLTI1Ni1nY206cGFzcw==@1.1.1.1:8388#Hello";
        let body = STANDARD.encode(inner);
        let nodes = parse_payload(&body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].link, inner);
    }

    #[test]
    fn clash_body_yields_links_with_config_blobs() {
        let body = r#"
proxies:
  - name: n1
    type: ss
    server: s
    port: 1234
    cipher: aes-128-gcm
    password: p
"#;
        let nodes = parse_payload(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].link, "ss://YWVzLTEyOC1nY206cA==@s:1234#n1");
        assert_eq!(nodes[0].name_hint.as_deref(), Some("n1"));
        let config = nodes[0].config.as_deref().unwrap();
        let map: serde_json::Value = serde_json::from_str(config).unwrap();
        assert_eq!(map["name"], "n1");
        assert_eq!(map["type"], "ss");
        assert_eq!(map["port"], 1234);
    }

    #[test]
    fn clash_entries_without_a_link_are_skipped() {
        let body = r#"
proxies:
  - name: broken
    type: wireguard
    server: s
    port: 1
  - name: ok
    type: trojan
    server: t.example
    port: 443
    password: pw
"#;
        let nodes = parse_payload(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name_hint.as_deref(), Some("ok"));
    }

    #[test]
    fn binary_base64_body_falls_back_to_original() {
        // decodes to invalid UTF-8, so the original text must be kept
        let body = STANDARD.encode([0u8, 159, 146, 150]);
        let nodes = parse_payload(&body);
        assert!(nodes.is_empty());
    }

    #[test]
    fn yaml_without_proxies_takes_the_line_path() {
        let body = "mode: rule\nrules:\n  - MATCH,DIRECT\n";
        assert!(parse_payload(body).is_empty());
    }
}
