pub mod admin;
pub mod agreement;
pub mod auth;
pub mod portal;
pub mod session;
pub mod surveys;

use crate::state::SharedState;
use axum::{routing::get, Json, Router};

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/portal/agreement", agreement::router(state.clone()))
        .nest("/portal/surveys", surveys::router(state.clone()))
        .nest("/portal", portal::router(state.clone()))
        .nest("/admin", admin::router(state))
}
