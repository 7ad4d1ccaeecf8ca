use crate::db;
use crate::domain::funnel::{Destination, Verdict};
use crate::domain::models::PortalType;
use crate::domain::normalize;
use crate::import_utils;
use crate::state::SharedState;
use crate::web::session::DoctorSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DoctorStatus {
    Completed,
    InProgress,
    Pending,
    NotStarted,
}

/// Per-doctor survey status for the dashboard: everything assigned answered
/// -> completed; any open response -> in-progress; assignments untouched ->
/// pending; nothing assigned -> not-started.
fn doctor_status(assigned: i64, completed: i64, in_progress: i64) -> DoctorStatus {
    if assigned > 0 && completed == assigned {
        DoctorStatus::Completed
    } else if in_progress > 0 {
        DoctorStatus::InProgress
    } else if assigned > 0 {
        DoctorStatus::Pending
    } else {
        DoctorStatus::NotStarted
    }
}

fn progress_percent(assigned: i64, completed: i64) -> i32 {
    if assigned > 0 {
        ((completed as f64 / assigned as f64) * 100.0) as i32
    } else {
        0
    }
}

#[derive(Serialize)]
struct StatsResponse {
    total_doctors: i64,
    completed: i64,
    in_progress: i64,
    pending: i64,
    not_started: i64,
    cp_doctors: i64,
    gc_doctors: i64,
    completion_rate: i32,
}

#[derive(Serialize)]
struct RosterEntry {
    id: Uuid,
    name: String,
    mobile: String,
    email: String,
    specialty: String,
    portal: Option<PortalType>,
    territory: String,
    manager: String,
    status: DoctorStatus,
    verdict: Verdict,
    destination: Destination,
    progress: i32,
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PortalFilter {
    portal: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    created: Vec<CreatedSurvey>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct CreatedSurvey {
    id: i64,
    title: String,
    questions: usize,
}

#[derive(Deserialize)]
struct AssignRequest {
    doctor_ids: Vec<Uuid>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/doctors", get(roster))
        .route("/surveys", post(upload_surveys))
        .route("/surveys/:id/assign", post(assign_survey))
        .route("/import/doctors", post(import_doctors))
        .with_state(state)
}

fn require_staff(session: &DoctorSession) -> Result<(), StatusCode> {
    if session.staff {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

async fn stats(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    require_staff(&session)?;

    let total = db::count_doctors(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let counts = db::doctor_survey_counts(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let (cp, gc) = db::portal_split(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut by_status: HashMap<DoctorStatus, i64> = HashMap::new();
    for row in &counts {
        *by_status
            .entry(doctor_status(row.assigned, row.completed, row.in_progress))
            .or_default() += 1;
    }
    let completed = by_status.get(&DoctorStatus::Completed).copied().unwrap_or(0);

    Ok(Json(StatsResponse {
        total_doctors: total,
        completed,
        in_progress: by_status.get(&DoctorStatus::InProgress).copied().unwrap_or(0),
        pending: by_status.get(&DoctorStatus::Pending).copied().unwrap_or(0),
        not_started: by_status.get(&DoctorStatus::NotStarted).copied().unwrap_or(0),
        cp_doctors: cp,
        gc_doctors: gc,
        completion_rate: progress_percent(total, completed),
    }))
}

async fn roster(
    session: DoctorSession,
    State(state): State<SharedState>,
    Query(filter): Query<PortalFilter>,
) -> Result<impl IntoResponse, StatusCode> {
    require_staff(&session)?;

    let portal = filter
        .portal
        .as_deref()
        .and_then(|p| PortalType::try_from(p).ok());
    let doctors = db::list_doctors(&state.pool, portal)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let counts: HashMap<Uuid, (i64, i64, i64)> = db::doctor_survey_counts(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|c| (c.doctor_id, (c.assigned, c.completed, c.in_progress)))
        .collect();

    let mut entries = Vec::with_capacity(doctors.len());
    for doctor in doctors {
        let funnel = db::funnel_for(&state.pool, &doctor)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let last_activity = db::last_activity(&state.pool, doctor.id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let (assigned, completed, in_progress) =
            counts.get(&doctor.id).copied().unwrap_or((0, 0, 0));

        let name = match (doctor.first_name.is_empty(), doctor.last_name.is_empty()) {
            (true, true) => doctor.mobile.clone(),
            _ => format!("{} {}", doctor.first_name, doctor.last_name)
                .trim()
                .to_string(),
        };

        entries.push(RosterEntry {
            id: doctor.id,
            name,
            mobile: doctor.mobile,
            email: doctor.email,
            specialty: doctor.specialty,
            portal: doctor.portal,
            territory: doctor.territory,
            manager: doctor.manager,
            status: doctor_status(assigned, completed, in_progress),
            verdict: funnel.verdict,
            destination: funnel.destination,
            progress: progress_percent(assigned, completed),
            last_activity,
        });
    }

    Ok(Json(entries))
}

/// Upload one survey definition or an array of them. Malformed entries are
/// reported as warnings without sinking the rest of the batch.
async fn upload_surveys(
    session: DoctorSession,
    State(state): State<SharedState>,
    Query(filter): Query<PortalFilter>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, StatusCode> {
    require_staff(&session)?;

    let portal = filter
        .portal
        .as_deref()
        .and_then(|p| PortalType::try_from(p).ok());
    let entries: Vec<&Value> = match &payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut created = Vec::new();
    let mut warnings = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match normalize::normalize_survey(entry) {
            Ok(normalized) => {
                let survey = db::upsert_survey(
                    &state.pool,
                    &normalized.title,
                    &normalized.description,
                    portal,
                )
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                db::replace_questions(&state.pool, survey.id, &normalized.questions)
                    .await
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                tracing::info!(
                    "Survey '{}' uploaded with {} questions",
                    survey.title,
                    normalized.questions.len()
                );
                created.push(CreatedSurvey {
                    id: survey.id,
                    title: survey.title,
                    questions: normalized.questions.len(),
                });
            }
            Err(e) => {
                tracing::warn!("Survey upload entry {} rejected: {}", idx + 1, e);
                warnings.push(format!("entry {}: {}", idx + 1, e));
            }
        }
    }

    Ok(Json(UploadResponse { created, warnings }))
}

async fn assign_survey(
    session: DoctorSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
    Json(payload): Json<AssignRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_staff(&session)?;

    db::find_survey(&state.pool, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    for doctor_id in &payload.doctor_ids {
        db::assign_survey(&state.pool, *doctor_id, survey_id)
            .await
            .map_err(|e| {
                tracing::error!("Assignment of survey {} failed: {}", survey_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
    }

    tracing::info!(
        "Survey {} assigned to {} doctors",
        survey_id,
        payload.doctor_ids.len()
    );
    Ok(Json(serde_json::json!({"assigned": payload.doctor_ids.len()})))
}

async fn import_doctors(
    session: DoctorSession,
    State(state): State<SharedState>,
    Json(rows): Json<Vec<Value>>,
) -> Result<impl IntoResponse, StatusCode> {
    require_staff(&session)?;

    let summary = import_utils::import_roster(&state.pool, &rows)
        .await
        .map_err(|e| {
            tracing::error!("Roster import failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(doctor_status(2, 2, 0), DoctorStatus::Completed);
        assert_eq!(doctor_status(2, 1, 1), DoctorStatus::InProgress);
        assert_eq!(doctor_status(2, 0, 0), DoctorStatus::Pending);
        assert_eq!(doctor_status(0, 0, 0), DoctorStatus::NotStarted);
        // An open response outranks untouched assignments.
        assert_eq!(doctor_status(3, 0, 2), DoctorStatus::InProgress);
    }

    #[test]
    fn progress_is_bounded() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(4, 1), 25);
        assert_eq!(progress_percent(4, 4), 100);
    }
}
