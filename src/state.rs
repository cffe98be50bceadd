use std::sync::Arc;

use crate::config::Config;
use crate::websocket::{router::RealtimeRouter, ConnectionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub router: Arc<RealtimeRouter>,
}
