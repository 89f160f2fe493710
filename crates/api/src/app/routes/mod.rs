use axum::{routing::get, Router};

pub mod nfe;
pub mod system;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/ping", get(system::health))
        .route("/health", get(system::health))
        .nest("/nfe", nfe::router())
}
