use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use subfuse::config::Config;
use subfuse::db::Repository;
use subfuse::error::Result;
use subfuse::services::{due, Pipeline, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let headless_refresh = args.len() >= 2 && args[1] == "--refresh";
    let export = args.len() >= 2 && args[1] == "--export";

    let config = Config::load()?;
    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&repo)));

    // Emit the current node set as a Clash document and exit
    if export {
        let nodes = repo.list_nodes().await?;
        let yaml = match &config.clash_template {
            Some(source) => {
                let template = subfuse::clash::load_template(source).await?;
                subfuse::clash::merge(&template, &subfuse::clash::nodes_to_proxies(&nodes))?
            }
            None => subfuse::clash::synthesize(&nodes)?,
        };
        println!("{yaml}");
        return Ok(());
    }

    // One sweep and exit
    if headless_refresh {
        let subscriptions = repo.list_enabled_subscriptions().await?;
        let now = chrono::Utc::now();
        for subscription in &subscriptions {
            if !due(subscription, now) {
                continue;
            }
            match pipeline.refresh(subscription).await {
                Ok(count) => println!("{}: {} nodes", subscription.name, count),
                Err(e) => eprintln!("{}: {}", subscription.name, e),
            }
        }
        return Ok(());
    }

    let tick = Duration::from_secs(config.tick_minutes * 60);
    let mut scheduler = Scheduler::start(Arc::clone(&pipeline), tick);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.stop();
    scheduler.join().await;

    Ok(())
}
