use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Normalized in-memory proxy record, a superset of the fields used by the
/// supported schemes. Serializes to Clash proxy-map field names; empty
/// optionals are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "port_is_zero")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(
        rename = "client-fingerprint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub udp: bool,
    #[serde(
        rename = "skip-cert-verify",
        default,
        skip_serializing_if = "is_false"
    )]
    pub skip_cert_verify: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servername: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(rename = "alterId", default, skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(
        rename = "reality-opts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reality_opts: Option<Map<String, Value>>,
    #[serde(rename = "ws-opts", default, skip_serializing_if = "Option::is_none")]
    pub ws_opts: Option<Map<String, Value>>,
    #[serde(
        rename = "grpc-opts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub grpc_opts: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_str: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    #[serde(
        rename = "obfs-password",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub obfs_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(
        rename = "protocol-param",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_relay_mode: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_sni: bool,
}

fn port_is_zero(port: &u16) -> bool {
    *port == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Proxy {
    /// `"<server>:<port>"`, the conventional substitute for a missing name.
    pub fn fallback_name(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Builds a record from an untyped Clash proxy map. Tolerates the
    /// heterogeneous shapes seen in the wild: ports and alterId as string or
    /// number, `tls` as bool or string.
    pub fn from_clash(map: &Value) -> Result<Proxy, ParseError> {
        let obj = map
            .as_object()
            .ok_or(ParseError::MissingField("type"))?;
        let kind = str_field(obj, "type").ok_or(ParseError::MissingField("type"))?;

        let mut proxy = Proxy {
            kind,
            name: str_field(obj, "name").unwrap_or_default(),
            server: str_field(obj, "server").unwrap_or_default(),
            port: obj
                .get("port")
                .map(coerce_port)
                .transpose()?
                .unwrap_or_default(),
            cipher: str_field(obj, "cipher"),
            password: str_field(obj, "password"),
            client_fingerprint: str_field(obj, "client-fingerprint"),
            udp: bool_field(obj, "udp"),
            skip_cert_verify: bool_field(obj, "skip-cert-verify"),
            tls: tls_field(obj.get("tls")),
            servername: str_field(obj, "servername"),
            flow: str_field(obj, "flow"),
            alter_id: obj.get("alterId").and_then(scalar_to_string),
            network: str_field(obj, "network"),
            reality_opts: opts_field(obj, "reality-opts"),
            ws_opts: opts_field(obj, "ws-opts"),
            grpc_opts: opts_field(obj, "grpc-opts"),
            auth_str: str_field(obj, "auth_str").or_else(|| str_field(obj, "auth")),
            up: int_field(obj, "up"),
            down: int_field(obj, "down"),
            peer: str_field(obj, "peer"),
            alpn: alpn_field(obj.get("alpn")),
            sni: str_field(obj, "sni"),
            obfs: str_field(obj, "obfs"),
            obfs_password: str_field(obj, "obfs-password"),
            protocol: str_field(obj, "protocol"),
            protocol_param: str_field(obj, "protocol-param"),
            uuid: str_field(obj, "uuid"),
            congestion_control: str_field(obj, "congestion_control"),
            udp_relay_mode: str_field(obj, "udp_relay_mode"),
            disable_sni: bool_field(obj, "disable_sni"),
        };
        proxy.normalize_opts();
        Ok(proxy)
    }

    /// Drops empty strings and empty sub-maps from the grouped option maps.
    pub fn normalize_opts(&mut self) {
        for opts in [&mut self.ws_opts, &mut self.grpc_opts, &mut self.reality_opts] {
            if let Some(map) = opts {
                prune_opts(map);
                if map.is_empty() {
                    *opts = None;
                }
            }
        }
    }
}

/// Recursively removes empty string values and empty sub-maps.
pub fn prune_opts(opts: &mut Map<String, Value>) {
    opts.retain(|_, v| match v {
        Value::String(s) => !s.is_empty(),
        Value::Object(m) => {
            prune_opts(m);
            !m.is_empty()
        }
        _ => true,
    });
}

/// Permissive integer coercion: accepts integers, floats, and numeric
/// strings, the shapes vmess payloads use for `port` and `aid`.
pub fn coerce_int(value: &Value) -> Result<i64, ParseError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(ParseError::MissingField("integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::MalformedUri(format!("not an integer: {s:?}"))),
        _ => Err(ParseError::MalformedUri(format!(
            "not an integer: {value}"
        ))),
    }
}

pub fn coerce_port(value: &Value) -> Result<u16, ParseError> {
    let n = coerce_int(value)?;
    u16::try_from(n).map_err(|_| ParseError::MalformedUri(format!("port out of range: {n}")))
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    obj.get(key).and_then(|v| coerce_int(v).ok())
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn tls_field(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "tls" || s == "true",
        _ => false,
    }
}

fn opts_field(obj: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match obj.get(key) {
        Some(Value::Object(m)) if !m.is_empty() => Some(m.clone()),
        _ => None,
    }
}

fn alpn_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => {
            s.split(',').map(|p| p.trim().to_string()).collect()
        }
        _ => Vec::new(),
    }
}
