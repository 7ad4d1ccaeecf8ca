use crate::db::{self, AssignedSurveyRow, QuestionRow, SurveyRow};
use crate::domain::funnel::Funnel;
use crate::state::SharedState;
use crate::web::session::DoctorSession;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Serialize)]
struct SurveyListResponse {
    surveys: Vec<AssignedSurveyRow>,
}

#[derive(Serialize)]
struct SurveyDetail {
    survey: SurveyRow,
    questions: Vec<QuestionRow>,
    /// Saved answers keyed by question id, for prefilling the form.
    answers: HashMap<i64, String>,
    is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SubmitAction {
    Save,
    Submit,
    Reset,
}

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default = "default_action")]
    action: SubmitAction,
    /// question id (as a string key) -> answer; checkbox answers may be
    /// arrays and are stored comma-joined.
    #[serde(default)]
    answers: HashMap<String, Value>,
}

fn default_action() -> SubmitAction {
    SubmitAction::Submit
}

#[derive(Serialize)]
struct SubmitResponse {
    saved: usize,
    is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    funnel: Option<Funnel>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_surveys))
        .route("/:id", get(survey_detail))
        .route("/:id", post(submit_survey))
        .route("/:id/document", get(document))
        .with_state(state)
}

async fn list_surveys(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    let surveys = db::assigned_surveys(&state.pool, session.doctor.id, session.doctor.portal)
        .await
        .map_err(|e| {
            tracing::error!("Survey list failed for {}: {}", session.doctor.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(SurveyListResponse { surveys }))
}

/// Loads a survey for filling in. The response row is created lazily here on
/// first visit.
async fn survey_detail(
    session: DoctorSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let survey = require_assigned(&state, session.doctor.id, survey_id).await?;

    let response = db::get_or_create_response(&state.pool, session.doctor.id, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let questions = db::list_questions(&state.pool, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let answers = db::answers_for(&state.pool, response.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|a| (a.question_id, a.value))
        .collect();

    Ok(Json(SurveyDetail {
        survey,
        questions,
        answers,
        is_completed: response.is_completed,
    }))
}

async fn submit_survey(
    session: DoctorSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_assigned(&state, session.doctor.id, survey_id).await?;

    let response = db::get_or_create_response(&state.pool, session.doctor.id, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if payload.action == SubmitAction::Reset {
        db::clear_answers(&state.pool, response.id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Ok(Json(SubmitResponse {
            saved: 0,
            is_completed: response.is_completed,
            funnel: None,
        }));
    }

    // Walk the survey's questions rather than the payload so stray keys for
    // other surveys are ignored.
    let questions = db::list_questions(&state.pool, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut saved = 0;
    for question in &questions {
        let Some(raw) = payload.answers.get(&question.id.to_string()) else {
            continue;
        };
        let Some(value) = answer_to_text(raw) else {
            continue;
        };
        db::upsert_answer(&state.pool, response.id, question.id, &value)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        saved += 1;
    }

    if payload.action == SubmitAction::Submit {
        db::complete_response(&state.pool, response.id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let funnel = db::funnel_for(&state.pool, &session.doctor)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tracing::info!(
            "Doctor {} submitted survey {} ({} answers)",
            session.doctor.id,
            survey_id,
            saved
        );
        return Ok(Json(SubmitResponse {
            saved,
            is_completed: true,
            funnel: Some(funnel),
        }));
    }

    Ok(Json(SubmitResponse {
        saved,
        is_completed: response.is_completed,
        funnel: None,
    }))
}

/// Printable response summary, available once the survey is completed.
async fn document(
    session: DoctorSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let survey = require_assigned(&state, session.doctor.id, survey_id).await?;
    let response = db::get_or_create_response(&state.pool, session.doctor.id, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !response.is_completed {
        return Err(StatusCode::FORBIDDEN);
    }

    let questions = db::list_questions(&state.pool, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let answers: HashMap<i64, String> = db::answers_for(&state.pool, response.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|a| (a.question_id, a.value))
        .collect();

    let mut body = String::new();
    for q in &questions {
        let answer = answers.get(&q.id).map(String::as_str).unwrap_or("—");
        body.push_str(&format!("<p><b>{}</b><br>{}</p>\n", q.text, answer));
    }
    let completed = response
        .completed_at
        .map(|t| t.format("%d %b %Y %H:%M UTC").to_string())
        .unwrap_or_default();
    let html = format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>{title}</title></head>
<body>
<h1>{title}</h1>
<p>Dr. {first} {last} — completed {completed}</p>
{body}
</body></html>
"#,
        title = survey.title,
        first = session.doctor.first_name,
        last = session.doctor.last_name,
        completed = completed,
        body = body,
    );

    let headers = [
        (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"survey_response.html\"".to_string(),
        ),
    ];
    Ok((headers, html))
}

async fn require_assigned(
    state: &SharedState,
    doctor_id: Uuid,
    survey_id: i64,
) -> Result<SurveyRow, StatusCode> {
    let survey = db::find_survey(&state.pool, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let assigned = db::is_assigned(&state.pool, doctor_id, survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !assigned {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(survey)
}

/// Flatten one submitted answer to its stored text form. Checkbox selections
/// arrive as arrays and are comma-joined.
fn answer_to_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.as_str().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkbox_answers_are_comma_joined() {
        assert_eq!(
            answer_to_text(&json!(["Follow-up Hb levels", "Serum ferritin levels"])),
            Some("Follow-up Hb levels, Serum ferritin levels".to_string())
        );
    }

    #[test]
    fn scalars_flatten() {
        assert_eq!(answer_to_text(&json!("Often")), Some("Often".into()));
        assert_eq!(answer_to_text(&json!(7)), Some("7".into()));
        assert_eq!(answer_to_text(&json!(true)), Some("true".into()));
        assert_eq!(answer_to_text(&Value::Null), None);
    }

    #[test]
    fn default_action_is_submit() {
        let req: SubmitRequest = serde_json::from_value(json!({"answers": {}})).unwrap();
        assert_eq!(req.action, SubmitAction::Submit);

        let req: SubmitRequest = serde_json::from_value(json!({"action": "reset"})).unwrap();
        assert_eq!(req.action, SubmitAction::Reset);
    }
}
