pub mod appresult;
pub mod config;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod realtime;
pub mod rooms;
pub mod session;
pub mod uploads;

use std::sync::Arc;

use axum::{Router, extract::FromRef, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{DropError, DropResult};
pub use hub::Hub;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub grants: Arc<uploads::Presigner>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: Hub, config: Config) -> Self {
        Self {
            hub,
            grants: Arc::new(uploads::Presigner::from_config(&config)),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(state.config.session_idle_minutes)));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/rooms", rooms::router())
        .nest("/uploads", uploads::router())
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
