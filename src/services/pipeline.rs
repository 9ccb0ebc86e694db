use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Repository;
use crate::error::Result;
use crate::link;
use crate::models::{NewNode, NewSubscription, Subscription};
use crate::sub::{RawNode, SubscriptionFetcher};

/// Orchestrates one subscription refresh: clear prior nodes, fetch, name,
/// persist, group, and update refresh metadata.
pub struct Pipeline {
    repo: Arc<Repository>,
    fetcher: SubscriptionFetcher,
    /// One lock per subscription id; concurrent refreshes of the same
    /// subscription serialize on it.
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            fetcher: SubscriptionFetcher::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Refreshes one subscription, returning the number of committed
    /// nodes. Individual bad entries are logged and skipped; only the
    /// network fetch and fatal persistence failures surface.
    pub async fn refresh(&self, subscription: &Subscription) -> Result<usize> {
        let lock = self.lock_for(subscription.id).await;
        let _guard = lock.lock().await;

        let raws = self.fetcher.fetch(subscription).await?;

        if let Err(e) = self.repo.clear_subscription_nodes(subscription.id).await {
            warn!(subscription = %subscription.name, "failed to clear prior nodes: {e}");
        }

        let count = self.commit(subscription, &raws).await?;

        if let Err(e) = self
            .repo
            .set_subscription_status(subscription.id, Utc::now(), count as i64)
            .await
        {
            warn!(subscription = %subscription.name, "failed to update status: {e}");
        }

        info!(subscription = %subscription.name, nodes = count, "subscription refreshed");
        Ok(count)
    }

    pub async fn refresh_by_id(&self, id: i64) -> Result<usize> {
        let subscription = self.repo.get_subscription(id).await?;
        self.refresh(&subscription).await
    }

    /// Creates a subscription and kicks off a best-effort background
    /// refresh for it; the refresh outcome is only logged.
    pub async fn add_subscription(
        self: Arc<Self>,
        new: NewSubscription,
    ) -> Result<Subscription> {
        let subscription = self.repo.insert_subscription(new).await?;
        Arc::clone(&self).spawn_refresh(subscription.clone());
        Ok(subscription)
    }

    pub fn spawn_refresh(self: Arc<Self>, subscription: Subscription) {
        tokio::spawn(async move {
            if let Err(e) = self.refresh(&subscription).await {
                warn!(subscription = %subscription.name, "background refresh failed: {e}");
            }
        });
    }

    /// Manually adds a single node. A missing name is recovered from the
    /// link; the node is attached to the given groups, created on demand.
    /// Manual nodes carry no subscription association.
    pub async fn add_node(
        &self,
        name: Option<String>,
        link_uri: String,
        groups: &[String],
    ) -> Result<i64> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let decoded = link::decode(&link_uri)?;
                if decoded.name.is_empty() {
                    decoded.fallback_name()
                } else {
                    decoded.name
                }
            }
        };
        let node_id = self
            .repo
            .insert_node(NewNode {
                name,
                link: link_uri,
                config: None,
            })
            .await?;
        self.repo.set_node_groups(node_id, groups).await?;
        Ok(node_id)
    }

    /// Inserts the fetched descriptors as nodes owned by the subscription.
    pub(crate) async fn commit(
        &self,
        subscription: &Subscription,
        raws: &[RawNode],
    ) -> Result<usize> {
        let mut batch = Vec::new();
        for raw in raws {
            let Some(name) = resolve_name(raw) else {
                warn!(link = %raw.link, "skipping node with no recoverable name");
                continue;
            };
            let name = format!("[{}] {}", subscription.name, name);

            let node_id = match self
                .repo
                .insert_node(NewNode {
                    name: name.clone(),
                    link: raw.link.clone(),
                    config: raw.config.clone(),
                })
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(node = %name, "failed to insert node: {e}");
                    continue;
                }
            };

            match self.repo.ensure_group(&subscription.name).await {
                Ok(group_id) => {
                    if let Err(e) = self.repo.associate_group_node(group_id, node_id).await {
                        warn!(node = %name, "failed to associate node to group: {e}");
                    }
                }
                Err(e) => warn!(group = %subscription.name, "failed to ensure group: {e}"),
            }

            batch.push(node_id);
        }

        if let Err(e) = self.repo.associate_nodes(subscription.id, &batch).await {
            warn!(subscription = %subscription.name, "failed to associate nodes: {e}");
        }
        Ok(batch.len())
    }

    async fn lock_for(&self, id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id).or_default())
    }
}

/// Recovers a display name: decode the link, then fall back to the Clash
/// map's own `name`.
fn resolve_name(raw: &RawNode) -> Option<String> {
    link::decode(&raw.link)
        .ok()
        .map(|p| p.name)
        .filter(|n| !n.is_empty())
        .or_else(|| raw.name_hint.clone())
}
