//! Process configuration loaded from environment variables (and `.env`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::PrincipalKind;

/// Read `key`, falling back to `default`, and parse it.
fn env_parse<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("{} has an invalid value", key))
}

fn env_required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// A principal registered in the in-memory directory at router startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPrincipal {
    pub kind: PrincipalKind,
    pub token: String,
    pub name: String,
}

impl SeedPrincipal {
    /// Parse a comma-separated `kind:TOKEN:name` list.
    pub fn parse_list(raw: &str) -> anyhow::Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let mut parts = entry.splitn(3, ':');
                let (Some(kind), Some(token), Some(name)) = (parts.next(), parts.next(), parts.next())
                else {
                    anyhow::bail!("seed principal '{}' must look like kind:TOKEN:name", entry);
                };
                Ok(Self {
                    kind: kind.parse()?,
                    token: token.to_string(),
                    name: name.to_string(),
                })
            })
            .collect()
    }
}

/// Router (central service) configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Listen address (default: 0.0.0.0:3001)
    pub bind_addr: SocketAddr,

    /// PostgreSQL connection string; the in-memory directory is used when unset
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Principals loaded into the in-memory directory
    pub seed_principals: Vec<SeedPrincipal>,

    /// Time a new connection has to authenticate (default: 10s)
    pub auth_timeout: Duration,

    /// Per-connection outbound event buffer (default: 256)
    pub outbound_buffer: usize,
}

impl RouterConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bind_addr: env_parse("RELAY_BIND_ADDR", "0.0.0.0:3001")?,
            database_url: env_optional("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", "20")?,
            seed_principals: SeedPrincipal::parse_list(
                &std::env::var("RELAY_SEED_PRINCIPALS").unwrap_or_default(),
            )?,
            auth_timeout: Duration::from_secs(env_parse("RELAY_AUTH_TIMEOUT_SECS", "10")?),
            outbound_buffer: env_parse("RELAY_OUTBOUND_BUFFER", "256")?,
        })
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            database_url: None,
            db_max_connections: 20,
            seed_principals: Vec::new(),
            auth_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
        }
    }
}

/// How a producer reaches the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent WebSocket session.
    WebSocket,
    /// One REST request per message.
    Http,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(TransportKind::WebSocket),
            "http" | "rest" => Ok(TransportKind::Http),
            other => anyhow::bail!("unknown transport '{}', expected ws or http", other),
        }
    }
}

/// Producer-side configuration (durable queue + delivery session).
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Router base URL, e.g. `ws://localhost:3001/ws` or `http://localhost:3001`
    pub router_url: String,
    pub transport: TransportKind,
    pub token: String,
    pub client_name: String,
    pub queue_dir: PathBuf,
    /// Durable queue capacity (default: 1000)
    pub queue_max_size: usize,
    /// Queue messages while offline instead of failing them (default: true)
    pub offline_queue: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Per-attempt network timeout
    pub request_timeout: Duration,
}

impl ProducerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let transport: TransportKind = env_parse("RELAY_TRANSPORT", "ws")?;
        let default_url = match transport {
            TransportKind::WebSocket => "ws://localhost:3001/ws",
            TransportKind::Http => "http://localhost:3001",
        };

        Ok(Self {
            router_url: std::env::var("RELAY_ROUTER_URL").unwrap_or_else(|_| default_url.to_string()),
            transport,
            token: env_required("RELAY_TOKEN")?,
            client_name: std::env::var("RELAY_CLIENT_NAME").unwrap_or_else(|_| "notify-cli".to_string()),
            queue_dir: PathBuf::from(
                std::env::var("RELAY_QUEUE_DIR").unwrap_or_else(|_| "./.notify-queue".to_string()),
            ),
            queue_max_size: env_parse("RELAY_QUEUE_MAX_SIZE", "1000")?,
            offline_queue: env_parse("RELAY_OFFLINE_QUEUE", "true")?,
            max_reconnect_attempts: env_parse("RELAY_MAX_RECONNECT_ATTEMPTS", "5")?,
            reconnect_base_delay: Duration::from_millis(env_parse("RELAY_RECONNECT_BASE_MS", "1000")?),
            reconnect_max_delay: Duration::from_millis(env_parse("RELAY_RECONNECT_MAX_MS", "30000")?),
            heartbeat_interval: Duration::from_secs(env_parse("RELAY_HEARTBEAT_SECS", "30")?),
            request_timeout: Duration::from_millis(env_parse("RELAY_REQUEST_TIMEOUT_MS", "5000")?),
        })
    }
}

/// Consumer-side configuration (rate-limited delivery stage + webhook sink).
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub router_url: String,
    pub token: String,
    pub name: String,
    pub sink_type: String,
    pub route_default: String,
    pub route_alerts: Option<String>,
    pub route_logs: Option<String>,
    pub route_errors: Option<String>,
    pub rate_limit_enabled: bool,
    /// Sends allowed per destination per window (default: 50)
    pub rate_limit_max_messages: usize,
    /// Sliding window length (default: 60s)
    pub rate_limit_window: Duration,
    /// Failed sends before a message is dead-lettered (default: 5)
    pub max_attempts: u32,
    /// Rate-limit deferrals before a message is dead-lettered (default: 100)
    pub max_deferrals: u32,
    /// Pause between sends while draining (default: 100ms)
    pub pacing: Duration,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl NotifierConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            router_url: std::env::var("RELAY_ROUTER_URL")
                .unwrap_or_else(|_| "ws://localhost:3001/ws".to_string()),
            token: env_required("NOTIFIER_TOKEN")?,
            name: std::env::var("NOTIFIER_NAME").unwrap_or_else(|_| "webhook-notifier".to_string()),
            sink_type: std::env::var("NOTIFIER_SINK_TYPE").unwrap_or_else(|_| "webhook".to_string()),
            route_default: env_required("NOTIFIER_ROUTE_DEFAULT")?,
            route_alerts: env_optional("NOTIFIER_ROUTE_ALERTS"),
            route_logs: env_optional("NOTIFIER_ROUTE_LOGS"),
            route_errors: env_optional("NOTIFIER_ROUTE_ERRORS"),
            rate_limit_enabled: env_parse("NOTIFIER_RATE_LIMIT_ENABLED", "true")?,
            rate_limit_max_messages: env_parse("NOTIFIER_RATE_LIMIT_MAX", "50")?,
            rate_limit_window: Duration::from_millis(env_parse("NOTIFIER_RATE_LIMIT_WINDOW_MS", "60000")?),
            max_attempts: env_parse("NOTIFIER_MAX_ATTEMPTS", "5")?,
            max_deferrals: env_parse("NOTIFIER_MAX_DEFERRALS", "100")?,
            pacing: Duration::from_millis(env_parse("NOTIFIER_PACING_MS", "100")?),
            heartbeat_interval: Duration::from_secs(env_parse("NOTIFIER_HEARTBEAT_SECS", "30")?),
            max_reconnect_attempts: env_parse("NOTIFIER_MAX_RECONNECT_ATTEMPTS", "10")?,
            reconnect_base_delay: Duration::from_millis(env_parse("NOTIFIER_RECONNECT_BASE_MS", "2000")?),
            reconnect_max_delay: Duration::from_millis(env_parse("NOTIFIER_RECONNECT_MAX_MS", "30000")?),
        })
    }
}

/// Exponential backoff `base * 2^(attempt - 1)`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp).min(max)
}
