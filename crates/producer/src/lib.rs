//! Producer side of the notify relay: a durable local queue and the delivery
//! session that drains it to the router.

pub mod error;
pub mod input;
pub mod queue;
pub mod session;
pub mod transport;

pub use error::{LinkError, QueueError, SessionError};
pub use queue::{DurableQueue, StorageMode};
pub use session::{DeliverySession, SendOutcome, SessionConfig, SessionHandle, SessionState};
