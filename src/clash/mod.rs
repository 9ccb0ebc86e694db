//! Clash YAML document handling: parsing the `proxies` array out of a
//! document, merging proxy records into an existing template, and
//! synthesizing a complete configuration from stored nodes.
//!
//! Documents are kept as generic YAML values throughout so unrelated keys
//! (`rules`, `dns`, `mode`, …) survive a round-trip untouched.

use serde_json::{json, Value as JsonValue};
use serde_yaml::Value as YamlValue;
use tracing::warn;

use crate::error::{Error, ParseError, Result};
use crate::link;
use crate::models::{Node, Proxy};

/// Extracts the `proxies` array as untyped JSON maps, or `None` when the
/// content is not a mapping with a non-empty `proxies` sequence. This is
/// also the format probe used by the fetcher.
pub fn document_proxies(content: &str) -> Option<Vec<JsonValue>> {
    let doc: YamlValue = serde_yaml::from_str(content).ok()?;
    if !doc.is_mapping() {
        return None;
    }
    let seq = doc.get("proxies")?.as_sequence()?;
    if seq.is_empty() {
        return None;
    }
    Some(
        seq.iter()
            .filter_map(|entry| match serde_json::to_value(entry) {
                Ok(value) if value.is_object() => Some(value),
                _ => {
                    warn!("skipping non-map proxies entry");
                    None
                }
            })
            .collect(),
    )
}

/// The `parse` operation: the `proxies` array of a Clash document.
pub fn parse(content: &str) -> Result<Vec<JsonValue>> {
    document_proxies(content)
        .ok_or_else(|| Error::InvalidArgument("document has no proxies".into()))
}

/// Converts one Clash proxy map into its canonical URI.
pub fn proxy_map_to_link(map: &JsonValue) -> std::result::Result<String, ParseError> {
    let proxy = Proxy::from_clash(map)?;
    link::encode(&proxy)
}

/// Merges proxy records into a template document: records are appended to
/// `proxies`, and each proxy-group picks up the new names. Group iteration
/// stops at the first `relay` group, matching the behavior clients have
/// come to depend on.
pub fn merge(template: &str, proxies: &[Proxy]) -> Result<String> {
    let mut doc: YamlValue = serde_yaml::from_str(template)?;
    if !doc.is_mapping() {
        return Err(Error::InvalidArgument("template is not a mapping".into()));
    }

    let names: Vec<String> = proxies.iter().map(|p| p.name.clone()).collect();

    let mut appended: Vec<YamlValue> = Vec::with_capacity(proxies.len());
    for proxy in proxies {
        appended.push(serde_yaml::to_value(proxy)?);
    }
    if doc.get("proxies").is_none() {
        if let Some(map) = doc.as_mapping_mut() {
            map.insert(YamlValue::from("proxies"), YamlValue::Sequence(Vec::new()));
        }
    }
    match doc.get_mut("proxies") {
        Some(YamlValue::Sequence(seq)) => seq.extend(appended),
        Some(other) => *other = YamlValue::Sequence(appended),
        None => {}
    }

    if let Some(YamlValue::Sequence(groups)) = doc.get_mut("proxy-groups") {
        for group in groups.iter_mut() {
            if !group.is_mapping() {
                continue;
            }
            if group.get("type").and_then(YamlValue::as_str) == Some("relay") {
                break;
            }
            if group.get("proxies").is_none() {
                if let Some(map) = group.as_mapping_mut() {
                    map.insert(YamlValue::from("proxies"), YamlValue::Sequence(Vec::new()));
                }
            }
            let new_members = names.iter().map(|n| YamlValue::from(n.as_str()));
            match group.get_mut("proxies") {
                Some(YamlValue::Sequence(members)) => {
                    members.retain(|v| !v.is_null());
                    members.extend(new_members);
                }
                Some(other) => *other = YamlValue::Sequence(new_members.collect()),
                None => {}
            }
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}

/// Reads a merge template from a local path or an HTTP(S) URL.
pub async fn load_template(source: &str) -> Result<String> {
    if source.contains("://") {
        let body = reqwest::get(source)
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    } else {
        Ok(tokio::fs::read_to_string(source).await?)
    }
}

/// Emits a complete Clash document from stored nodes: preserved config
/// blobs are used verbatim (with each node's stored name taking precedence
/// over the blob's own), falling back to decoding the node's link.
pub fn synthesize(nodes: &[Node]) -> Result<String> {
    let mut proxies: Vec<JsonValue> = Vec::new();
    for node in nodes {
        match proxy_entry(node) {
            Some(entry) => proxies.push(entry),
            None => warn!(node = %node.name, "skipping node with unusable link and config"),
        }
    }
    let names: Vec<&str> = proxies
        .iter()
        .filter_map(|p| p.get("name").and_then(JsonValue::as_str))
        .collect();

    let doc = json!({
        "proxies": proxies,
        "proxy-groups": [
            {"name": "🚀 节点选择", "type": "select", "proxies": names},
            {
                "name": "♻️ 自动选择",
                "type": "url-test",
                "proxies": names,
                "url": "http://www.gstatic.com/generate_204",
                "interval": 300,
            },
            {
                "name": "🔯 故障转移",
                "type": "fallback",
                "proxies": names,
                "url": "http://www.gstatic.com/generate_204",
                "interval": 300,
            },
            {"name": "🎯 直连", "type": "select", "proxies": ["DIRECT"]},
            {"name": "🛑 拒绝", "type": "select", "proxies": ["REJECT"]},
        ],
        "rules": [
            "DOMAIN-SUFFIX,local,🎯 直连",
            "IP-CIDR,127.0.0.0/8,🎯 直连",
            "IP-CIDR,172.16.0.0/12,🎯 直连",
            "IP-CIDR,192.168.0.0/16,🎯 直连",
            "IP-CIDR,10.0.0.0/8,🎯 直连",
            "IP-CIDR,100.64.0.0/10,🎯 直连",
            "MATCH,🚀 节点选择",
        ],
    });
    Ok(serde_yaml::to_string(&doc)?)
}

/// Rebuilds [`Proxy`] records from stored nodes, for merging into a
/// template: the config blob is preferred, the link is the fallback, and
/// the stored name always wins.
pub fn nodes_to_proxies(nodes: &[Node]) -> Vec<Proxy> {
    let mut proxies = Vec::with_capacity(nodes.len());
    for node in nodes {
        let restored = node
            .config
            .as_deref()
            .filter(|c| !c.is_empty())
            .and_then(|c| serde_json::from_str::<JsonValue>(c).ok())
            .and_then(|map| Proxy::from_clash(&map).ok())
            .or_else(|| link::decode(&node.link).ok());
        match restored {
            Some(mut proxy) => {
                if !node.name.is_empty() {
                    proxy.name = node.name.clone();
                } else if proxy.name.is_empty() {
                    proxy.name = proxy.fallback_name();
                }
                proxies.push(proxy);
            }
            None => warn!(node = %node.name, "skipping node with unusable link and config"),
        }
    }
    proxies
}

fn proxy_entry(node: &Node) -> Option<JsonValue> {
    if let Some(config) = node.config.as_deref().filter(|c| !c.is_empty()) {
        if let Ok(JsonValue::Object(mut map)) = serde_json::from_str::<JsonValue>(config) {
            if !node.name.is_empty() {
                map.insert("name".into(), JsonValue::String(node.name.clone()));
            }
            return Some(JsonValue::Object(map));
        }
    }
    let mut proxy = link::decode(&node.link).ok()?;
    if !node.name.is_empty() {
        proxy.name = node.name.clone();
    } else if proxy.name.is_empty() {
        proxy.name = proxy.fallback_name();
    }
    serde_json::to_value(&proxy).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
mode: rule
dns:
  enable: true
proxies:
  - name: A
    type: ss
    server: a.example
    port: 1
    cipher: aes-128-gcm
    password: p
proxy-groups:
  - name: select
    type: select
    proxies:
      - A
      - ~
rules:
  - MATCH,select
"#;

    fn incoming() -> Vec<Proxy> {
        ["B", "C"]
            .iter()
            .map(|name| Proxy {
                name: (*name).into(),
                kind: "ss".into(),
                server: "s".into(),
                port: 2,
                cipher: Some("aes-128-gcm".into()),
                password: Some("p".into()),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn merge_appends_proxies_and_group_members() {
        let merged = merge(TEMPLATE, &incoming()).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&merged).unwrap();

        let proxies = doc.get("proxies").unwrap().as_sequence().unwrap();
        let names: Vec<&str> = proxies
            .iter()
            .map(|p| p.get("name").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        let group = &doc.get("proxy-groups").unwrap().as_sequence().unwrap()[0];
        let members: Vec<&str> = group
            .get("proxies")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        // nil entry dropped, new names appended
        assert_eq!(members, vec!["A", "B", "C"]);
    }

    #[test]
    fn merge_preserves_unrelated_keys() {
        let merged = merge(TEMPLATE, &incoming()).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&merged).unwrap();
        assert_eq!(doc.get("mode").unwrap().as_str(), Some("rule"));
        assert_eq!(
            doc.get("dns").unwrap().get("enable"),
            Some(&YamlValue::from(true))
        );
        assert_eq!(doc.get("rules").unwrap().as_sequence().unwrap().len(), 1);
    }

    #[test]
    fn merge_stops_at_first_relay_group() {
        let template = r#"
proxies: []
proxy-groups:
  - name: chain
    type: relay
    proxies: [A]
  - name: select
    type: select
    proxies: [A]
"#;
        let merged = merge(template, &incoming()).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&merged).unwrap();
        let groups = doc.get("proxy-groups").unwrap().as_sequence().unwrap();
        for group in groups {
            let members = group.get("proxies").unwrap().as_sequence().unwrap();
            assert_eq!(members.len(), 1, "no group past the relay may grow");
        }
    }

    #[test]
    fn merge_without_groups_or_proxies_section() {
        let merged = merge("mode: rule\n", &incoming()).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&merged).unwrap();
        let proxies = doc.get("proxies").unwrap().as_sequence().unwrap();
        assert_eq!(proxies.len(), 2);
    }

    #[test]
    fn parse_extracts_proxy_maps() {
        let maps = parse(TEMPLATE).unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["name"], "A");
        assert_eq!(maps[0]["cipher"], "aes-128-gcm");
        assert!(parse("mode: rule\n").is_err());
    }

    #[test]
    fn proxy_map_to_link_synthesizes_ss() {
        let map = json!({
            "name": "n1",
            "type": "ss",
            "server": "s",
            "port": 1234,
            "cipher": "aes-128-gcm",
            "password": "p"
        });
        assert_eq!(
            proxy_map_to_link(&map).unwrap(),
            "ss://YWVzLTEyOC1nY206cA==@s:1234#n1"
        );
    }

    #[test]
    fn nodes_to_proxies_prefers_config_and_overrides_name() {
        let nodes = vec![Node {
            id: 1,
            name: "[sub] renamed".into(),
            link: "ss://YWVzLTEyOC1nY206cA==@s:1234#n1".into(),
            config: Some(r#"{"name":"n1","type":"ss","server":"s","port":1234,"cipher":"aes-128-gcm","password":"p"}"#.into()),
        }];
        let proxies = nodes_to_proxies(&nodes);
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0].name, "[sub] renamed");
        assert_eq!(proxies[0].kind, "ss");
        assert_eq!(proxies[0].cipher.as_deref(), Some("aes-128-gcm"));
    }

    #[test]
    fn synthesize_prefers_config_blob_with_name_override() {
        let nodes = vec![
            Node {
                id: 1,
                name: "[sub] n1".into(),
                link: "ss://YWVzLTEyOC1nY206cA==@s:1234#n1".into(),
                config: Some(r#"{"name":"n1","type":"ss","server":"s","port":1234,"cipher":"aes-128-gcm","password":"p"}"#.into()),
            },
            Node {
                id: 2,
                name: "[sub] ex".into(),
                link: "trojan://pw@ex.com:443#ex".into(),
                config: None,
            },
        ];
        let yaml = synthesize(&nodes).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&yaml).unwrap();
        let proxies = doc.get("proxies").unwrap().as_sequence().unwrap();
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].get("name").unwrap().as_str(), Some("[sub] n1"));
        assert_eq!(proxies[0].get("cipher").unwrap().as_str(), Some("aes-128-gcm"));
        assert_eq!(proxies[1].get("name").unwrap().as_str(), Some("[sub] ex"));

        let groups = doc.get("proxy-groups").unwrap().as_sequence().unwrap();
        assert_eq!(groups.len(), 5);
        let auto = &groups[1];
        assert_eq!(auto.get("type").unwrap().as_str(), Some("url-test"));
        assert_eq!(auto.get("interval").unwrap().as_u64(), Some(300));
        let members = auto.get("proxies").unwrap().as_sequence().unwrap();
        assert_eq!(members.len(), 2);

        let rules = doc.get("rules").unwrap().as_sequence().unwrap();
        assert_eq!(rules.last().unwrap().as_str(), Some("MATCH,🚀 节点选择"));
    }
}
