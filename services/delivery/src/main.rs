// Delivery node entry point.
use anyhow::{Context, Result};
use delivery::config::DeliveryConfig;
use delivery::observability;
use herald_registry::Hub;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DeliveryConfig::from_env_or_yaml().context("load delivery config")?;
    let prometheus = observability::init_observability();

    let hub = Hub::new(config.hub_config());
    tracing::info!(
        mailbox_size = config.mailbox_size,
        idle_timeout_ms = config.idle_timeout_ms,
        "delivery hub started"
    );

    let metrics_task = {
        let addr = config.metrics_bind;
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(prometheus, addr).await {
                tracing::warn!(error = %err, "metrics listener exited");
            }
        })
    };
    tracing::info!(addr = %config.metrics_bind, "metrics listener started");

    // Transports and the bus adapter attach through the library API; the
    // binary just keeps the hub alive until SIGINT.
    let _ = tokio::signal::ctrl_c().await;
    hub.shutdown();
    metrics_task.abort();
    tracing::info!("delivery node stopped");
    Ok(())
}
