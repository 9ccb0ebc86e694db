use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod proxy;

pub use proxy::{coerce_int, coerce_port, prune_opts, Proxy};

/// User-Agent applied to subscriptions created without one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Default refresh interval in seconds for new subscriptions.
pub const DEFAULT_UPDATE_INTERVAL: i64 = 3600;

/// A remote subscription source producing a bundle of proxy definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// Seconds between automatic refreshes.
    pub update_interval: i64,
    pub last_update: Option<DateTime<Utc>>,
    pub node_count: i64,
    pub group_name: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub update_interval: i64,
    pub group_name: Option<String>,
    pub user_agent: String,
}

impl NewSubscription {
    /// Fills the interval and user-agent defaults that the store expects.
    pub fn with_defaults(mut self) -> Self {
        if self.update_interval < 1 {
            self.update_interval = DEFAULT_UPDATE_INTERVAL;
        }
        if self.user_agent.is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self
    }
}

/// One proxy endpoint as persisted: canonical link plus the original Clash
/// map, when the node came from a Clash document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub link: String,
    pub config: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub link: String,
    pub config: Option<String>,
}

/// A named set of nodes used by downstream consumers to filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}
