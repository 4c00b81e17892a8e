//! Application state shared across handlers

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{broker::Broker, config::Config, error::Result};

/// Application state shared across handlers
///
/// Cheap to clone: the config and broker sit behind `Arc`, and clones of
/// the shutdown token all observe the same cancellation.
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
    broker: Arc<Broker>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create state around an existing broker
    pub fn new(config: Config, broker: Arc<Broker>) -> Self {
        Self {
            config: Arc::new(config),
            broker,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create state with a broker built from `config.broker`
    pub fn from_config(config: Config) -> Result<Self> {
        let broker = Broker::from_config(&config.broker)?;
        Ok(Self::new(config, Arc::new(broker)))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a handle to the broker
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    /// Token that ends every open stream when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_broker_and_token() {
        let state = AppState::from_config(Config::default()).unwrap();
        let clone = state.clone();

        assert!(Arc::ptr_eq(&state.broker(), &clone.broker()));

        state.shutdown_token().cancel();
        assert!(clone.shutdown_token().is_cancelled());
    }
}
