//! Notify relay webhook notifier entrypoint.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use relay_common::config::NotifierConfig;

use relay_notifier::{ChannelRoutes, Consumer, ConsumerConfig, DeliveryStage, RateLimiter, StageConfig, WebhookSink};

const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_notifier=info")),
        )
        .json()
        .init();

    tracing::info!("Starting notify relay notifier...");

    let config = NotifierConfig::from_env()?;

    let limiter = if config.rate_limit_enabled {
        RateLimiter::new(config.rate_limit_max_messages, config.rate_limit_window)
    } else {
        tracing::warn!("Rate limiting disabled");
        RateLimiter::disabled()
    };

    let sink = WebhookSink::new(SINK_TIMEOUT)?;
    let mut stage = DeliveryStage::new(sink, limiter, ChannelRoutes::from(&config), StageConfig::from(&config));
    stage.set_ready(true).await;

    let mut consumer = Consumer::new(ConsumerConfig::from(&config), stage);

    tokio::select! {
        result = consumer.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
        }
    }

    tracing::info!(
        parked = consumer.stage().parked(),
        dead_letters = consumer.stage().dead_letter_count(),
        "Notifier stopped."
    );
    Ok(())
}
