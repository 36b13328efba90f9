//! Consumer side of the notify relay: receives notifications from the router
//! and delivers them to external destinations under per-destination rate
//! limits.

pub mod consumer;
pub mod error;
pub mod rate_limiter;
pub mod render;
pub mod routing;
pub mod sink;
pub mod stage;

pub use consumer::{Consumer, ConsumerConfig};
pub use error::{ConsumerError, SinkError};
pub use rate_limiter::RateLimiter;
pub use routing::ChannelRoutes;
pub use sink::{Sink, WebhookSink};
pub use stage::{DeadLetter, DeadLetterReason, DeliveryStage, SendResult, StageConfig};
