//! Shared application state for the router.

use std::sync::Arc;

use relay_common::config::RouterConfig;

use crate::directory::Directory;
use crate::hub::Hub;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub directory: Directory,
    pub config: Arc<RouterConfig>,
}

impl AppState {
    pub fn new(directory: Directory, config: RouterConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new()),
            directory,
            config: Arc::new(config),
        }
    }
}
