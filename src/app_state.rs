use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::relay::Relay;

/// State shared by every connection handler.
///
/// The relay sits behind one mutex so each inbound event is applied to the
/// registry and broadcast session as a whole before the next one starts.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Mutex<Relay>>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Arc::new(Mutex::new(Relay::new(config.link_timeout))),
            config: Arc::new(config),
        }
    }
}
