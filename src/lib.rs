pub mod config;
pub mod library;
pub mod opds;
pub mod scanner;
pub mod state;
pub mod watcher;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    opds::router(state).layer(TraceLayer::new_for_http())
}
