//! Shared model, wire protocol and configuration for the notify relay.

pub mod config;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;
