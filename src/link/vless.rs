use serde_json::{Map, Value};
use url::Url;

use crate::error::ParseError;
use crate::models::Proxy;

use super::{
    fragment_suffix, non_empty, opt_str, percent_decode, query_get, query_map, query_suffix,
    split_alpn, LinkCodec,
};

/// `vless://uuid@host:port?type=&security=&sni=&flow=&fp=&alpn=&pbk=&sid=&path=&host=&serviceName=&mode=#name`
///
/// `security=reality` carries reality options; `tls`/`xtls` set the TLS
/// flag; `none` or absent leaves it off.
pub struct VlessCodec;

impl LinkCodec for VlessCodec {
    fn scheme(&self) -> &'static str {
        "vless"
    }

    fn decode(&self, uri: &str) -> Result<Proxy, ParseError> {
        let url = Url::parse(uri).map_err(|e| ParseError::MalformedUri(e.to_string()))?;
        let uuid = url.username().to_string();
        if uuid.is_empty() {
            return Err(ParseError::MissingField("uuid"));
        }
        let server = url
            .host_str()
            .ok_or(ParseError::MissingField("server"))?
            .to_string();
        let port = url.port().ok_or(ParseError::MissingField("port"))?;
        let query = query_map(&url);
        let get = |key: &str| query_get(&query, key);

        let security = get("security");
        let network = get("type");

        let mut proxy = Proxy {
            name: url.fragment().map(percent_decode).unwrap_or_default(),
            kind: "vless".into(),
            server,
            port,
            uuid: Some(uuid),
            tls: matches!(security.as_str(), "tls" | "xtls" | "reality"),
            servername: non_empty(get("sni")),
            flow: non_empty(get("flow")),
            client_fingerprint: non_empty(get("fp")),
            network: non_empty(network.clone()),
            alpn: split_alpn(&query),
            ..Default::default()
        };

        if security == "reality" {
            let mut reality_opts = Map::new();
            reality_opts.insert("public-key".into(), Value::String(get("pbk")));
            reality_opts.insert("short-id".into(), Value::String(get("sid")));
            proxy.reality_opts = Some(reality_opts);
        }
        match network.as_str() {
            "ws" => {
                let mut ws_opts = Map::new();
                ws_opts.insert("path".into(), Value::String(get("path")));
                let mut headers = Map::new();
                headers.insert("Host".into(), Value::String(get("host")));
                ws_opts.insert("headers".into(), Value::Object(headers));
                proxy.ws_opts = Some(ws_opts);
            }
            "grpc" => {
                let mut grpc_opts = Map::new();
                let mode = if get("mode") == "multi" { "multi" } else { "gun" };
                grpc_opts.insert("grpc-mode".into(), Value::String(mode.into()));
                let service = non_empty(get("serviceName")).unwrap_or_else(|| get("path"));
                grpc_opts.insert("grpc-service-name".into(), Value::String(service));
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

        let security = if proxy.reality_opts.is_some() {
            "reality"
        } else if proxy.tls {
            "tls"
        } else {
            "none"
        };
        let ws_path = opt_str(&proxy.ws_opts, "path");
        let ws_host = proxy
            .ws_opts
            .as_ref()
            .and_then(|o| o.get("headers"))
            .and_then(Value::as_object)
            .and_then(|h| h.get("Host"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let grpc_service = opt_str(&proxy.grpc_opts, "grpc-service-name");
        let grpc_mode = opt_str(&proxy.grpc_opts, "grpc-mode");

        let pairs = [
            ("type", proxy.network.clone().unwrap_or_default()),
            ("security", security.to_string()),
            ("sni", proxy.servername.clone().unwrap_or_default()),
            ("flow", proxy.flow.clone().unwrap_or_default()),
            ("fp", proxy.client_fingerprint.clone().unwrap_or_default()),
            ("alpn", proxy.alpn.join(",")),
            ("pbk", opt_str(&proxy.reality_opts, "public-key")),
            ("sid", opt_str(&proxy.reality_opts, "short-id")),
            ("path", ws_path),
            ("host", ws_host),
            ("serviceName", grpc_service),
            (
                "mode",
                if grpc_mode == "multi" { grpc_mode } else { String::new() },
            ),
        ];

        Ok(format!(
            "vless://{}@{}:{}{}{}",
            uuid,
            proxy.server,
            proxy.port,
            query_suffix(&pairs),
            fragment_suffix(&proxy.name)
        ))
    }
}
