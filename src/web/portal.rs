use crate::db::{self, DoctorRow, ProfileUpdate};
use crate::domain::funnel::Funnel;
use crate::state::SharedState;
use crate::web::session::DoctorSession;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;

#[derive(Serialize)]
struct ProfileResponse {
    doctor: DoctorRow,
    funnel: Funnel,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/next", get(next_step))
        .route("/profile", get(view_profile))
        .route("/profile", put(save_profile))
        .with_state(state)
}

/// The funnel gateway: every page load asks this where to go.
async fn next_step(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    let funnel = db::funnel_for(&state.pool, &session.doctor)
        .await
        .map_err(|e| {
            tracing::error!("Funnel evaluation failed for {}: {}", session.doctor.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(funnel))
}

async fn view_profile(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    let funnel = db::funnel_for(&state.pool, &session.doctor)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(ProfileResponse {
        doctor: session.doctor,
        funnel,
    }))
}

async fn save_profile(
    session: DoctorSession,
    State(state): State<SharedState>,
    Json(mut payload): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, StatusCode> {
    // A blank profession defaults to Doctor.
    if payload.profession.trim().is_empty() {
        payload.profession = "Doctor".to_string();
    }

    let doctor = db::update_profile(&state.pool, session.doctor.id, &payload)
        .await
        .map_err(|e| {
            tracing::error!("Profile update failed for {}: {}", session.doctor.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let funnel = db::funnel_for(&state.pool, &doctor)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!("Doctor {} updated profile", doctor.id);
    Ok(Json(ProfileResponse { doctor, funnel }))
}
