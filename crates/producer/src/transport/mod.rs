//! Links from a producer to the router.
//!
//! A `RouterConnector` opens an authenticated `RouterLink`; the session owns at
//! most one link at a time and drops it on the first connectivity failure.

use std::future::Future;

use relay_common::types::WireMessage;

use crate::error::LinkResult;

pub mod http;
pub mod ws;

pub use http::{HttpConnector, HttpLink};
pub use ws::{WsConnector, WsLink};

/// Opens authenticated links to the router.
pub trait RouterConnector: Send + Sync + 'static {
    type Link: RouterLink;

    fn connect(&self) -> impl Future<Output = LinkResult<Self::Link>> + Send;
}

/// An authenticated connection able to deliver messages.
pub trait RouterLink: Send + 'static {
    /// Deliver one message; resolves once the router confirmed it.
    fn deliver(&mut self, message: &WireMessage) -> impl Future<Output = LinkResult<()>> + Send;

    fn heartbeat(&mut self) -> impl Future<Output = LinkResult<()>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}
