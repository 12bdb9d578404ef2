//! Daemon entry point: configuration, logging, the core task, the
//! listener, autoconnect links and the periodic timers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshircd::config::Config;
use meshircd::net::{self, CoreEvent, Links};
use meshircd::state::Mesh;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "meshircd.toml".to_owned());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    info!(
        server = %config.server.name,
        sid = %config.server.sid,
        links = config.links.len(),
        "starting"
    );

    let listen_addr = config.server.listen.clone();
    let identity = (
        config.server.name.clone(),
        config.server.sid.clone(),
        config.server.description.clone(),
    );
    let autoconnect: Vec<_> = config
        .links
        .iter()
        .filter(|l| l.autoconnect)
        .cloned()
        .collect();

    let mesh = Mesh::new(config);
    let links = Links::new();
    let (events_tx, events_rx) = mpsc::channel::<CoreEvent>(1024);

    // the single task that owns all core state
    let core = tokio::spawn(net::run_core(mesh, links.clone(), events_rx));

    // S2S listener
    {
        let links = links.clone();
        let events = events_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = net::listen(listen_addr, links, events).await {
                warn!(error = %err, "listener failed");
            }
        });
    }

    // outbound links
    for block in autoconnect {
        let links = links.clone();
        let events = events_tx.clone();
        let identity = identity.clone();
        tokio::spawn(async move {
            net::connect_peer(identity, block, links, events).await;
        });
    }

    // timers: chandelay sweep and splitmode census
    {
        let events = events_tx.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(Duration::from_secs(30));
            let mut split = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        if events.send(CoreEvent::SweepTick).await.is_err() {
                            return;
                        }
                    }
                    _ = split.tick() => {
                        if events.send(CoreEvent::SplitTick).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    core.await.context("core task ended")?;
    Ok(())
}
