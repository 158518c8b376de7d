use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    clock::Clock,
    config::Config,
    session::handle::{SessionDeps, SessionRegistry},
    store::{KeyValueStore, QuizCatalog, RemoteStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub remote: Arc<dyn RemoteStore>,
    pub catalog: Arc<dyn QuizCatalog>,
    /// Server-side stand-in for the client's session storage.
    pub local: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            remote: self.remote.clone(),
            catalog: self.catalog.clone(),
            local: self.local.clone(),
            clock: self.clock.clone(),
            settings: self.config.session.clone(),
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
