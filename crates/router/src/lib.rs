//! Notify relay router: authenticates producers and consumers over WebSocket
//! and fans producer messages out to consumers and dashboard observers.

pub mod connection;
pub mod directory;
pub mod hub;
pub mod middleware;
pub mod routes;
pub mod state;
