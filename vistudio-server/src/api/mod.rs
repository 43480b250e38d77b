//! HTTP routes.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::state::AppState;

pub mod caption;
pub mod health;
pub mod image;
pub mod text;

/// Create the main router: the JSON API under `/api`, the page at `/` and
/// its assets under `/static`.
pub fn router(state: AppState, http: &HttpConfig) -> Router {
    let api_routes = Router::new()
        .route("/caption", post(caption::caption))
        .route("/txt2img", post(image::txt2img))
        .route("/summarize", post(text::summarize))
        .route("/elaborate", post(text::elaborate))
        .route("/health", get(health::health))
        .layer(DefaultBodyLimit::max(http.max_body_bytes));

    Router::new()
        .route_service("/", ServeFile::new(&http.index))
        .nest_service("/static", ServeDir::new(&http.static_dir))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
