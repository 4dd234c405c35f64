use std::sync::Arc;

use crate::config::Config;
use crate::library::Library;
use crate::opds::auth::AuthState;
use crate::opds::covers::CoverCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub library: Arc<Library>,
    pub auth: Arc<AuthState>,
    pub covers: Arc<CoverCache>,
}

impl AppState {
    pub fn new(config: Config, library: Arc<Library>) -> Self {
        let auth = AuthState::new(config.credentials());
        Self {
            config: Arc::new(config),
            library,
            auth: Arc::new(auth),
            covers: Arc::new(CoverCache::default()),
        }
    }
}
