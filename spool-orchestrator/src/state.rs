//! Shared application state
//!
//! Cloned into every handler and background task. Everything inside is
//! reference-counted.

use std::sync::Arc;

use crate::config::Config;
use crate::publisher::{CredentialIssuer, StatusPublisher};
use crate::repository::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub publisher: Arc<StatusPublisher>,
    pub credentials: CredentialIssuer,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, config: Config) -> Self {
        let credentials = CredentialIssuer::new(&config.stream_secret, config.credential_ttl);
        let publisher = Arc::new(StatusPublisher::new(
            Arc::clone(&store),
            credentials.clone(),
            config.heartbeat_interval,
            config.heartbeat_timeout,
        ));

        Self {
            store,
            publisher,
            credentials,
            config: Arc::new(config),
        }
    }
}
