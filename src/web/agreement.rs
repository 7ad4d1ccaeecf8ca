use crate::db::{self, DoctorRow, SurveyRow};
use crate::domain::funnel::Funnel;
use crate::domain::models::SignatureKind;
use crate::state::SharedState;
use crate::web::session::DoctorSession;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Compensation amounts rotate across doctors in a fixed sequence (INR).
const AMOUNTS: [i32; 4] = [10_000, 20_000, 25_000, 30_000];

fn next_amount(already_assigned: i64) -> i32 {
    AMOUNTS[(already_assigned % AMOUNTS.len() as i64) as usize]
}

#[derive(Serialize)]
struct AgreementView {
    amount: i32,
    agreement_text: String,
    survey: Option<SurveyRow>,
    signed: bool,
}

#[derive(Deserialize)]
struct SignRequest {
    agreed: bool,
    signature: String,
    #[serde(default = "default_kind")]
    kind: SignatureKind,
    agreement_text: Option<String>,
}

fn default_kind() -> SignatureKind {
    SignatureKind::Drawn
}

#[derive(Serialize)]
struct SignResponse {
    signed_at: chrono::DateTime<chrono::Utc>,
    funnel: Funnel,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(view_agreement))
        .route("/sign", post(sign))
        .route("/document", get(document))
        .with_state(state)
}

/// The doctor's compensation amount is fixed on first view of the agreement.
async fn ensure_amount(state: &SharedState, doctor: &DoctorRow) -> Result<i32, StatusCode> {
    if let Some(amount) = doctor.agreement_amount {
        return Ok(amount);
    }
    let used = db::count_amount_assigned(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let amount = next_amount(used);
    db::set_agreement_amount(&state.pool, doctor.id, amount)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(amount)
}

/// The agreement page targets the doctor's most recently assigned survey.
async fn target_survey(
    state: &SharedState,
    doctor: &DoctorRow,
) -> Result<Option<SurveyRow>, StatusCode> {
    let assigned = db::assignments_for(&state.pool, doctor.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let Some(latest) = assigned.last() else {
        return Ok(None);
    };
    db::find_survey(&state.pool, latest.survey_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn agreement_text(doctor: &DoctorRow, survey: Option<&SurveyRow>, amount: i32) -> String {
    let name = format!("{} {}", doctor.first_name, doctor.last_name);
    let survey_title = survey.map(|s| s.title.as_str()).unwrap_or("the assigned survey");
    format!(
        "I, Dr. {}, agree to participate in \"{}\" and to share my clinical \
         observations. I acknowledge a compensation of INR {} for my \
         participation, subject to completion of the survey.",
        name.trim(),
        survey_title,
        amount
    )
}

async fn view_agreement(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    let amount = ensure_amount(&state, &session.doctor).await?;
    let survey = target_survey(&state, &session.doctor).await?;
    let signed = db::find_agreement(&state.pool, session.doctor.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|a| a.is_signed())
        .unwrap_or(false);

    Ok(Json(AgreementView {
        amount,
        agreement_text: agreement_text(&session.doctor, survey.as_ref(), amount),
        survey,
        signed,
    }))
}

async fn sign(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: DoctorSession,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<SignRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !payload.agreed {
        return Err(StatusCode::BAD_REQUEST);
    }
    // A signature is mandatory; an agreement row without one never counts as
    // signed, so refusing here keeps half-written rows out of the table.
    if payload.signature.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let amount = ensure_amount(&state, &session.doctor).await?;
    let survey = target_survey(&state, &session.doctor).await?;
    let text = payload
        .agreement_text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| agreement_text(&session.doctor, survey.as_ref(), amount));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let ip = addr.ip().to_string();

    let agreement = db::sign_agreement(
        &state.pool,
        session.doctor.id,
        survey.as_ref().map(|s| s.id),
        &text,
        payload.signature.trim(),
        payload.kind,
        amount,
        Some(ip.as_str()),
        user_agent,
    )
    .await
    .map_err(|e| {
        tracing::error!("Agreement signing failed for {}: {}", session.doctor.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let funnel = db::funnel_for(&state.pool, &session.doctor)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!("Doctor {} signed agreement", session.doctor.id);
    Ok(Json(SignResponse {
        signed_at: agreement.signed_at.unwrap_or_else(chrono::Utc::now),
        funnel,
    }))
}

/// Printable agreement for download, available once signed.
async fn document(
    session: DoctorSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, StatusCode> {
    let agreement = db::find_agreement(&state.pool, session.doctor.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter(|a| a.is_signed())
        .ok_or(StatusCode::FORBIDDEN)?;

    let doctor = &session.doctor;
    let signed_at = agreement
        .signed_at
        .map(|t| t.format("%d %b %Y %H:%M UTC").to_string())
        .unwrap_or_default();
    let html = format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Participant Agreement</title></head>
<body>
<h1>Participant Agreement</h1>
<p>{text}</p>
<p>Doctor: Dr. {first} {last} ({mobile})</p>
<p>Compensation: INR {amount}</p>
<p>Signed at: {signed_at}</p>
<p>Signature ({kind:?}):</p>
<img alt="signature" src="{signature}">
</body></html>
"#,
        text = agreement.agreement_text,
        first = doctor.first_name,
        last = doctor.last_name,
        mobile = doctor.mobile,
        amount = agreement.amount,
        signed_at = signed_at,
        kind = agreement.kind,
        signature = agreement.signature.as_deref().unwrap_or(""),
    );

    let headers = [
        (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"participant_agreement.html\"".to_string(),
        ),
    ];
    Ok((headers, html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_rotation_cycles() {
        assert_eq!(next_amount(0), 10_000);
        assert_eq!(next_amount(1), 20_000);
        assert_eq!(next_amount(2), 25_000);
        assert_eq!(next_amount(3), 30_000);
        assert_eq!(next_amount(4), 10_000);
    }
}
