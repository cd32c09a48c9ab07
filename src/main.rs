use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use starlight_lib::peer::WebRtcConnector;
use starlight_lib::signaling::NostrSignaling;
use starlight_lib::utils::{display_id, viewer_url};
use starlight_lib::{host, logger, probe_target, Broker, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    logger::init(config.log.as_deref());

    let connector_id = config
        .resolve_connector_id()
        .context("failed to load the connector id")?;

    let target = config.target();
    if !config.skip_target_check {
        if let Err(e) = probe_target(&target, Duration::from_secs(3)).await {
            error!("Nothing is listening on {}: {}", target, e);
            bail!("target {target} unreachable; start the service or pass --skip-target-check");
        }
    }

    println!("Connector ID: {}", display_id(&connector_id));
    println!(
        "Viewer:       {}",
        viewer_url(&config.viewer_url, config.relay_host(), &connector_id)
    );

    let connector = Arc::new(WebRtcConnector::new(
        &config.ice_servers(),
        config.gather_timeout(),
    ));
    let broker = Broker::new(connector, config.negotiation_timeout());

    let signaling = Arc::new(
        NostrSignaling::connect(&config.relay_url, &connector_id)
            .await
            .with_context(|| format!("failed to reach relay {}", config.relay_url))?,
    );

    info!("Online, forwarding to {}", target);
    let closed = host::serve(
        broker,
        signaling.clone(),
        target,
        config.keepalive_interval(),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await;

    signaling.disconnect().await;
    info!("Stopped, {} session(s) closed", closed);
    Ok(())
}
