// Application state for HTTP handlers
use crate::application::relay_service::RelayService;

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayService,
}
