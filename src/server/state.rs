use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::relay::RelayService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub relay: Arc<RelayService>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, relay: Arc<RelayService>) -> Self {
        Self {
            settings: Arc::new(settings),
            relay,
            start_time: Instant::now(),
        }
    }
}
