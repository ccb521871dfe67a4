use std::sync::Arc;

use crate::hub::StationHub;

/// Shared state handed to every route and viewer connection.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<StationHub>,
}

impl AppState {
    pub fn new(hub: Arc<StationHub>) -> Self {
        Self { hub }
    }
}
