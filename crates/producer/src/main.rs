//! Producer binary: reads messages from stdin, one per line, and hands them to
//! the delivery session. Undelivered messages stay in the local queue for the
//! next run.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use relay_common::config::{ProducerConfig, TransportKind};
use relay_producer::input::parse_line;
use relay_producer::transport::{HttpConnector, RouterConnector, WsConnector};
use relay_producer::{DeliverySession, DurableQueue, SendOutcome, SessionConfig, SessionHandle};

/// How long to keep draining after stdin closes.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout is reserved for per-message results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_producer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ProducerConfig::from_env()?;
    tracing::info!(
        router = %config.router_url,
        transport = ?config.transport,
        queue_dir = %config.queue_dir.display(),
        "Starting relay producer"
    );

    match config.transport {
        TransportKind::WebSocket => {
            let connector = WsConnector::new(
                config.router_url.clone(),
                config.token.clone(),
                config.client_name.clone(),
                config.request_timeout,
            );
            run(connector, &config).await
        }
        TransportKind::Http => {
            let connector = HttpConnector::new(config.router_url.clone(), config.token.clone(), config.request_timeout)?;
            run(connector, &config).await
        }
    }
}

async fn run<C: RouterConnector>(connector: C, config: &ProducerConfig) -> anyhow::Result<()> {
    let queue = DurableQueue::open(&config.queue_dir, config.queue_max_size).await?;
    let (session, task) = DeliverySession::new(connector, queue, SessionConfig::from(config)).spawn();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                interrupted = true;
                break;
            }
        };
        let Some(line) = line else { break };

        let message = match parse_line(&line) {
            None => continue,
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                println!("rejected: {}", e);
                continue;
            }
        };

        let id = message.id.clone();
        match session.send(message).await {
            SendOutcome::Delivered => println!("delivered {}", id),
            SendOutcome::Queued { durable: true } => println!("queued {}", id),
            SendOutcome::Queued { durable: false } => println!("queued {} (memory only)", id),
            SendOutcome::Rejected(reason) => println!("rejected {}: {}", id, reason),
            SendOutcome::Failed(reason) => println!("failed {}: {}", id, reason),
        }
    }

    if !interrupted {
        wait_for_drain(&session).await;
    }

    let pending = session.pending().await?.len();
    if pending > 0 {
        tracing::warn!(pending, "Messages left in the local queue for the next run");
    }

    session.shutdown().await?;
    task.await?;
    Ok(())
}

/// Give the session a chance to flush what is queued.
async fn wait_for_drain(session: &SessionHandle) {
    let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
    while tokio::time::Instant::now() < deadline {
        match session.pending().await {
            Ok(pending) if !pending.is_empty() => tokio::time::sleep(Duration::from_millis(200)).await,
            _ => return,
        }
    }
}
