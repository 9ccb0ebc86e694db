use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::models::Subscription;
use crate::services::Pipeline;

/// Default scheduler tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(30 * 60);

/// Periodic refresh driver. Sweeps once at startup, then on every tick.
/// Stopping cancels future ticks only; an in-flight sweep runs to
/// completion, and a stopped scheduler cannot be restarted.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(pipeline: Arc<Pipeline>, tick: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(tick_secs = tick.as_secs(), "subscription scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&pipeline).await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("subscription scheduler stopped");
        });
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signals the scheduler loop to exit. Safe to call more than once.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
    }

    /// Waits for the scheduler task to finish after a stop.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// Whether a subscription's interval has elapsed since its last refresh.
pub fn due(subscription: &Subscription, now: DateTime<Utc>) -> bool {
    match subscription.last_update {
        None => true,
        Some(last) => (now - last).num_seconds() >= subscription.update_interval,
    }
}

async fn sweep(pipeline: &Arc<Pipeline>) {
    let subscriptions = match pipeline.repository().list_enabled_subscriptions().await {
        Ok(subs) => subs,
        Err(e) => {
            error!("failed to load enabled subscriptions: {e}");
            return;
        }
    };
    if subscriptions.is_empty() {
        return;
    }

    let now = Utc::now();
    for subscription in subscriptions {
        if !due(&subscription, now) {
            continue;
        }
        match pipeline.refresh(&subscription).await {
            Ok(count) => {
                info!(subscription = %subscription.name, nodes = count, "scheduled refresh done")
            }
            Err(e) => error!(subscription = %subscription.name, "scheduled refresh failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use crate::models::NewSubscription;
    use chrono::Duration as ChronoDuration;

    fn subscription(last_update: Option<DateTime<Utc>>, interval: i64) -> Subscription {
        Subscription {
            id: 1,
            name: "s".into(),
            url: "https://s.example".into(),
            enabled: true,
            update_interval: interval,
            last_update,
            node_count: 0,
            group_name: None,
            user_agent: String::new(),
        }
    }

    #[test]
    fn never_refreshed_subscription_is_due() {
        assert!(due(&subscription(None, 3600), Utc::now()));
    }

    #[test]
    fn second_refresh_within_interval_is_skipped() {
        let now = Utc::now();
        let sub = subscription(Some(now - ChronoDuration::seconds(10)), 3600);
        assert!(!due(&sub, now));
    }

    #[test]
    fn elapsed_interval_makes_subscription_due() {
        let now = Utc::now();
        let sub = subscription(Some(now - ChronoDuration::seconds(3600)), 3600);
        assert!(due(&sub, now));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminates_the_task() {
        let repo = Arc::new(Repository::new_in_memory().await.unwrap());
        // a disabled subscription keeps the sweep from touching the network
        repo.insert_subscription(NewSubscription {
            name: "off".into(),
            url: "https://off.example".into(),
            enabled: false,
            ..Default::default()
        })
        .await
        .unwrap();
        let pipeline = Arc::new(Pipeline::new(repo));

        let mut scheduler = Scheduler::start(pipeline, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop();
        scheduler.stop();
        scheduler.join().await;
    }
}
