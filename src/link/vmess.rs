use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::ParseError;
use crate::models::{coerce_int, coerce_port, Proxy};

use super::{decode_base64_text, LinkCodec};

/// `vmess://base64(JSON{v,ps,add,port,id,aid,scy,net,tls,host,path,sni})`
///
/// `port` and `aid` arrive as number or string in the wild; both are
/// normalized to integers.
pub struct VmessCodec;

impl LinkCodec for VmessCodec {
    fn scheme(&self) -> &'static str {
        "vmess"
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let rest = uri
            .strip_prefix("vmess://")
            .ok_or_else(|| ParseError::MalformedUri(uri.to_string()))?;
        let payload = decode_base64_text(rest)?;
        let doc: Value = serde_json::from_str(&payload)
            .map_err(|e| ParseError::BadInnerJson(e.to_string()))?;
        let obj = doc
            .as_object()
            .ok_or_else(|| ParseError::BadInnerJson("not a JSON object".into()))?;

        let server = json_str(obj, "add").ok_or(ParseError::MissingField("add"))?;
        let uuid = json_str(obj, "id").ok_or(ParseError::MissingField("id"))?;
        let port = coerce_port(obj.get("port").ok_or(ParseError::MissingField("port"))?)?;
        let aid = match obj.get("aid") {
            Some(v) => coerce_int(v)?,
            None => 0,
        };

        let network = json_str(obj, "net");
        let tls_raw = json_str(obj, "tls").unwrap_or_default();
        let host = json_str(obj, "host").unwrap_or_default();
        let path = json_str(obj, "path").unwrap_or_default();

        let mut proxy = Proxy {
            name: json_str(obj, "ps").unwrap_or_default(),
            kind: "vmess".into(),
            server,
            port,
            uuid: Some(uuid),
            alter_id: Some(aid.to_string()),
            cipher: json_str(obj, "scy"),
            network: network.clone(),
            tls: !tls_raw.is_empty() && tls_raw != "none",
            servername: json_str(obj, "sni"),
            ..Default::default()
        };
        match network.as_deref() {
            Some("ws") => {
                let mut ws_opts = Map::new();
                ws_opts.insert("path".into(), Value::String(path));
                let mut headers = Map::new();
                headers.insert("Host".into(), Value::String(host));
                ws_opts.insert("headers".into(), Value::Object(headers));
                proxy.ws_opts = Some(ws_opts);
            }
            Some("grpc") => {
                let mut grpc_opts = Map::new();
                grpc_opts.insert("grpc-service-name".into(), Value::String(path));
                proxy.grpc_opts = Some(grpc_opts);
            }
            _ => {}
        }
        proxy.normalize_opts();
        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String, ParseError> {
        if proxy.server.is_empty() || proxy.port == 0 {
            return Err(ParseError::MissingField("server"));
        }
        let uuid = proxy.uuid.as_deref().ok_or(ParseError::MissingField("uuid"))?;
        let aid: i64 = proxy
            .alter_id
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0);

        let mut obj = Map::new();
        obj.insert("v".into(), json!("2"));
        obj.insert("ps".into(), json!(proxy.name));
        obj.insert("add".into(), json!(proxy.server));
        obj.insert("port".into(), json!(proxy.port));
        obj.insert("id".into(), json!(uuid));
        obj.insert("aid".into(), json!(aid));
        obj.insert("scy".into(), json!(proxy.cipher.as_deref().unwrap_or("")));
        obj.insert("net".into(), json!(proxy.network.as_deref().unwrap_or("")));
        obj.insert("tls".into(), json!(if proxy.tls { "tls" } else { "" }));
        if let Some(sni) = proxy.servername.as_deref().filter(|s| !s.is_empty()) {
            obj.insert("sni".into(), Value::String(sni.into()));
        }
        match proxy.network.as_deref() {
            Some("ws") => {
                if let Some(ws_opts) = &proxy.ws_opts {
                    if let Some(path) = ws_opts.get("path").and_then(Value::as_str) {
                        obj.insert("path".into(), Value::String(path.into()));
                    }
                    if let Some(host) = ws_opts
                        .get("headers")
                        .and_then(Value::as_object)
                        .and_then(|h| h.get("Host"))
                        .and_then(Value::as_str)
                    {
                        obj.insert("host".into(), Value::String(host.into()));
                    }
                }
            }
            Some("grpc") => {
                if let Some(service) = proxy
                    .grpc_opts
                    .as_ref()
                    .and_then(|g| g.get("grpc-service-name"))
                    .and_then(Value::as_str)
                {
                    obj.insert("path".into(), Value::String(service.into()));
                }
            }
            _ => {}
        }

        let payload = serde_json::to_string(&obj)
            .map_err(|e| ParseError::BadInnerJson(e.to_string()))?;
        Ok(format!("vmess://{}", STANDARD.encode(payload)))
    }
}

fn json_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // {"v":"2","ps":"Test","add":"1.2.3.4","port":"443","id":"aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
    //  "aid":"0","net":"ws","host":"h.com","path":"/p","tls":"tls"}
    const SEED: &str = "vmess://eyJ2IjoiMiIsInBzIjoiVGVzdCIsImFkZCI6IjEuMi4zLjQiLCJwb3J0IjoiNDQzIiwiaWQiOiJhYWFhYWFhYS1iYmJiLWNjY2MtZGRkZC1lZWVlZWVlZWVlZWUiLCJhaWQiOiIwIiwibmV0Ijoid3MiLCJob3N0IjoiaC5jb20iLCJwYXRoIjoiL3AiLCJ0bHMiOiJ0bHMifQ==";

    #[test]
    fn decodes_string_port_and_aid() {
        let proxy = VmessCodec.decode(SEED).unwrap();
        assert_eq!(proxy.name, "Test");
        assert_eq!(proxy.server, "1.2.3.4");
        assert_eq!(proxy.port, 443);
        assert_eq!(proxy.uuid.as_deref(), Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"));
        assert_eq!(proxy.alter_id.as_deref(), Some("0"));
        assert!(proxy.tls);
        let ws_opts = proxy.ws_opts.as_ref().unwrap();
        assert_eq!(ws_opts["path"], "/p");
        assert_eq!(ws_opts["headers"]["Host"], "h.com");
    }

    #[test]
    fn decodes_numeric_port_and_aid() {
        let payload = r#"{"v":"2","ps":"N","add":"h","port":443,"id":"u","aid":2}"#;
        let uri = format!("vmess://{}", STANDARD.encode(payload));
        let proxy = VmessCodec.decode(&uri).unwrap();
        assert_eq!(proxy.port, 443);
        assert_eq!(proxy.alter_id.as_deref(), Some("2"));
        assert!(!proxy.tls);
    }

    #[test]
    fn bad_port_is_parse_error() {
        let payload = r#"{"ps":"N","add":"h","port":"not-a-port","id":"u"}"#;
        let uri = format!("vmess://{}", STANDARD.encode(payload));
        assert!(matches!(
            VmessCodec.decode(&uri),
            Err(ParseError::MalformedUri(_))
        ));
    }

    #[test]
    fn bad_inner_json_is_reported() {
        let uri = format!("vmess://{}", STANDARD.encode("{not json"));
        assert!(matches!(
            VmessCodec.decode(&uri),
            Err(ParseError::BadInnerJson(_))
        ));
    }

    #[test]
    fn url_safe_outer_payload_is_equivalent() {
        let raw = decode_base64_text(SEED.strip_prefix("vmess://").unwrap()).unwrap();
        let url_safe = format!(
            "vmess://{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
        );
        assert_eq!(
            VmessCodec.decode(&url_safe).unwrap(),
            VmessCodec.decode(SEED).unwrap()
        );
    }

    #[test]
    fn round_trip() {
        let first = VmessCodec.decode(SEED).unwrap();
        let emitted = VmessCodec.encode(&first).unwrap();
        assert_eq!(VmessCodec.decode(&emitted).unwrap(), first);
    }

    #[test]
    fn grpc_service_name_travels_through_path() {
        let payload = r#"{"ps":"G","add":"h","port":1,"id":"u","net":"grpc","path":"svc"}"#;
        let uri = format!("vmess://{}", STANDARD.encode(payload));
        let proxy = VmessCodec.decode(&uri).unwrap();
        assert_eq!(
            proxy.grpc_opts.as_ref().unwrap()["grpc-service-name"],
            "svc"
        );
        let decoded = VmessCodec.decode(&VmessCodec.encode(&proxy).unwrap()).unwrap();
        assert_eq!(decoded, proxy);
    }
}
