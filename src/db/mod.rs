pub mod seed;

use crate::domain::funnel::{self, AgreementState, AssignedSurvey, Funnel, ProfileSnapshot};
use crate::domain::models::{PortalType, SignatureKind};
use crate::domain::normalize::NormalizedQuestion;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

/// OTP codes are valid for five minutes.
pub const OTP_TTL_SECS: i64 = 300;
pub const OTP_MAX_ATTEMPTS: i16 = 5;

const DOCTOR_COLUMNS: &str = r#"
    id, mobile, portal, first_name, last_name, email, gender, address,
    city, state, pincode, profession, specialty, clinic_name, qualification,
    registration_no, pan, territory, manager, agreement_amount, is_staff,
    created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DoctorRow {
    pub id: Uuid,
    pub mobile: String,
    pub portal: Option<PortalType>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub gender: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub profession: String,
    pub specialty: String,
    pub clinic_name: String,
    pub qualification: String,
    pub registration_no: String,
    pub pan: String,
    pub territory: String,
    pub manager: String,
    pub agreement_amount: Option<i32>,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DoctorRow> for ProfileSnapshot {
    fn from(d: &DoctorRow) -> Self {
        ProfileSnapshot {
            first_name: d.first_name.clone(),
            email: d.email.clone(),
            profession: d.profession.clone(),
            specialty: d.specialty.clone(),
            address: d.address.clone(),
            city: d.city.clone(),
            state: d.state.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct OtpRow {
    pub mobile: String,
    pub code: String,
    pub portal: Option<PortalType>,
    pub attempts: i16,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl OtpRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(OTP_TTL_SECS)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= OTP_MAX_ATTEMPTS
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct AgreementRow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub survey_id: Option<i64>,
    pub agreement_text: String,
    pub signature: Option<String>,
    pub kind: SignatureKind,
    pub amount: i32,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl AgreementRow {
    pub fn state(&self) -> AgreementState {
        AgreementState {
            has_signature: self.signature.is_some(),
            signed_at: self.signed_at,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.state().is_signed()
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct SurveyRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub portal: Option<PortalType>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub survey_id: i64,
    pub text: String,
    pub kind: String,
    pub options: Json<Vec<String>>,
    pub required: bool,
    pub position: i32,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ResponseRow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub survey_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
}

/// An assigned survey as shown in the doctor's list, with completion state.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct AssignedSurveyRow {
    pub survey_id: i64,
    pub title: String,
    pub description: String,
    pub assigned_at: DateTime<Utc>,
    pub is_completed: bool,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct AnswerRow {
    pub question_id: i64,
    pub value: String,
}

// ============================================
// Doctors
// ============================================

pub async fn find_doctor(pool: &PgPool, id: Uuid) -> Result<Option<DoctorRow>> {
    let row = sqlx::query_as::<_, DoctorRow>(&format!(
        "SELECT {DOCTOR_COLUMNS} FROM doctors WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Get or create the doctor for a verified mobile number. A portal supplied
/// at login replaces the stored one; logins without a portal keep it.
pub async fn get_or_create_doctor(
    pool: &PgPool,
    mobile: &str,
    portal: Option<PortalType>,
) -> Result<DoctorRow> {
    let row = sqlx::query_as::<_, DoctorRow>(&format!(
        r#"
        INSERT INTO doctors (mobile, portal)
        VALUES ($1, $2)
        ON CONFLICT (mobile) DO UPDATE
            SET portal = COALESCE(EXCLUDED.portal, doctors.portal),
                updated_at = now()
        RETURNING {DOCTOR_COLUMNS}
        "#
    ))
    .bind(mobile)
    .bind(portal)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub gender: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub profession: String,
    pub specialty: String,
    pub clinic_name: String,
    pub qualification: String,
    pub registration_no: String,
    pub pan: String,
}

pub async fn update_profile(pool: &PgPool, id: Uuid, upd: &ProfileUpdate) -> Result<DoctorRow> {
    let row = sqlx::query_as::<_, DoctorRow>(&format!(
        r#"
        UPDATE doctors SET
            first_name = $2, last_name = $3, email = $4, gender = $5,
            address = $6, city = $7, state = $8, pincode = $9,
            profession = $10, specialty = $11, clinic_name = $12,
            qualification = $13, registration_no = $14, pan = $15,
            updated_at = now()
        WHERE id = $1
        RETURNING {DOCTOR_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&upd.first_name)
    .bind(&upd.last_name)
    .bind(&upd.email)
    .bind(&upd.gender)
    .bind(&upd.address)
    .bind(&upd.city)
    .bind(&upd.state)
    .bind(&upd.pincode)
    .bind(&upd.profession)
    .bind(&upd.specialty)
    .bind(&upd.clinic_name)
    .bind(&upd.qualification)
    .bind(&upd.registration_no)
    .bind(&upd.pan)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list_doctors(pool: &PgPool, portal: Option<PortalType>) -> Result<Vec<DoctorRow>> {
    let rows = sqlx::query_as::<_, DoctorRow>(&format!(
        r#"
        SELECT {DOCTOR_COLUMNS} FROM doctors
        WHERE $1::portal_type IS NULL OR portal = $1
        ORDER BY created_at DESC
        "#
    ))
    .bind(portal)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_amount_assigned(pool: &PgPool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM doctors WHERE agreement_amount IS NOT NULL")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn set_agreement_amount(pool: &PgPool, id: Uuid, amount: i32) -> Result<()> {
    sqlx::query("UPDATE doctors SET agreement_amount = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(amount)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================
// OTP verification
// ============================================

/// The portal seen at login rides along on the OTP row so verification can
/// hand it to the doctor record.
pub async fn upsert_otp(
    pool: &PgPool,
    mobile: &str,
    code: &str,
    portal: Option<PortalType>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO otp_verifications (mobile, code, portal)
        VALUES ($1, $2, $3)
        ON CONFLICT (mobile) DO UPDATE
            SET code = EXCLUDED.code, portal = EXCLUDED.portal,
                attempts = 0, verified = FALSE, created_at = now()
        "#,
    )
    .bind(mobile)
    .bind(code)
    .bind(portal)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_otp(pool: &PgPool, mobile: &str) -> Result<Option<OtpRow>> {
    let row = sqlx::query_as::<_, OtpRow>(
        "SELECT mobile, code, portal, attempts, verified, created_at FROM otp_verifications WHERE mobile = $1",
    )
    .bind(mobile)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn bump_otp_attempts(pool: &PgPool, mobile: &str) -> Result<()> {
    sqlx::query("UPDATE otp_verifications SET attempts = attempts + 1 WHERE mobile = $1")
        .bind(mobile)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_otp_verified(pool: &PgPool, mobile: &str) -> Result<()> {
    sqlx::query("UPDATE otp_verifications SET verified = TRUE WHERE mobile = $1")
        .bind(mobile)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop stale OTP rows; run hourly by the scheduler.
pub async fn purge_expired_otps(pool: &PgPool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM otp_verifications WHERE created_at < now() - INTERVAL '1 hour'")
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ============================================
// Agreements
// ============================================

pub async fn find_agreement(pool: &PgPool, doctor_id: Uuid) -> Result<Option<AgreementRow>> {
    let row = sqlx::query_as::<_, AgreementRow>(
        r#"
        SELECT id, doctor_id, survey_id, agreement_text, signature, kind,
               amount, ip_address, user_agent, signed_at
        FROM agreements
        WHERE doctor_id = $1
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub async fn sign_agreement(
    pool: &PgPool,
    doctor_id: Uuid,
    survey_id: Option<i64>,
    agreement_text: &str,
    signature: &str,
    kind: SignatureKind,
    amount: i32,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<AgreementRow> {
    let row = sqlx::query_as::<_, AgreementRow>(
        r#"
        INSERT INTO agreements
            (doctor_id, survey_id, agreement_text, signature, kind, amount,
             ip_address, user_agent, signed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        ON CONFLICT (doctor_id) DO UPDATE SET
            survey_id = EXCLUDED.survey_id,
            agreement_text = EXCLUDED.agreement_text,
            signature = EXCLUDED.signature,
            kind = EXCLUDED.kind,
            amount = EXCLUDED.amount,
            ip_address = EXCLUDED.ip_address,
            user_agent = EXCLUDED.user_agent,
            signed_at = now()
        RETURNING id, doctor_id, survey_id, agreement_text, signature, kind,
                  amount, ip_address, user_agent, signed_at
        "#,
    )
    .bind(doctor_id)
    .bind(survey_id)
    .bind(agreement_text)
    .bind(signature)
    .bind(kind)
    .bind(amount)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

// ============================================
// Surveys and questions
// ============================================

pub async fn upsert_survey(
    pool: &PgPool,
    title: &str,
    description: &str,
    portal: Option<PortalType>,
) -> Result<SurveyRow> {
    let row = sqlx::query_as::<_, SurveyRow>(
        r#"
        INSERT INTO surveys (title, description, portal)
        VALUES ($1, $2, $3)
        ON CONFLICT (title) DO UPDATE
            SET description = EXCLUDED.description,
                portal = COALESCE(EXCLUDED.portal, surveys.portal)
        RETURNING id, title, description, portal, created_at
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(portal)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn find_survey(pool: &PgPool, id: i64) -> Result<Option<SurveyRow>> {
    let row = sqlx::query_as::<_, SurveyRow>(
        "SELECT id, title, description, portal, created_at FROM surveys WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_survey_by_title(pool: &PgPool, title: &str) -> Result<Option<SurveyRow>> {
    let row = sqlx::query_as::<_, SurveyRow>(
        "SELECT id, title, description, portal, created_at FROM surveys WHERE title = $1",
    )
    .bind(title)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Replace a survey's question set with a freshly normalized one.
pub async fn replace_questions(
    pool: &PgPool,
    survey_id: i64,
    questions: &[NormalizedQuestion],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM questions WHERE survey_id = $1")
        .bind(survey_id)
        .execute(&mut *tx)
        .await?;
    for q in questions {
        sqlx::query(
            r#"
            INSERT INTO questions (survey_id, text, kind, options, required, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(survey_id)
        .bind(&q.text)
        .bind(q.kind.as_str())
        .bind(Json(&q.options))
        .bind(q.required)
        .bind(q.position)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn list_questions(pool: &PgPool, survey_id: i64) -> Result<Vec<QuestionRow>> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        r#"
        SELECT id, survey_id, text, kind, options, required, position
        FROM questions
        WHERE survey_id = $1
        ORDER BY position, id
        "#,
    )
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn assign_survey(pool: &PgPool, doctor_id: Uuid, survey_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO survey_assignments (doctor_id, survey_id)
        VALUES ($1, $2)
        ON CONFLICT (doctor_id, survey_id) DO NOTHING
        "#,
    )
    .bind(doctor_id)
    .bind(survey_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_assigned(pool: &PgPool, doctor_id: Uuid, survey_id: i64) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM survey_assignments WHERE doctor_id = $1 AND survey_id = $2)",
    )
    .bind(doctor_id)
    .bind(survey_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn assignments_for(pool: &PgPool, doctor_id: Uuid) -> Result<Vec<AssignedSurvey>> {
    let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT survey_id, assigned_at
        FROM survey_assignments
        WHERE doctor_id = $1
        ORDER BY assigned_at, survey_id
        "#,
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(survey_id, assigned_at)| AssignedSurvey {
            survey_id,
            assigned_at,
        })
        .collect())
}

/// Assigned surveys for the doctor's list view, filtered to the doctor's
/// portal when one is set (portal-less doctors see everything assigned).
pub async fn assigned_surveys(
    pool: &PgPool,
    doctor_id: Uuid,
    portal: Option<PortalType>,
) -> Result<Vec<AssignedSurveyRow>> {
    let rows = sqlx::query_as::<_, AssignedSurveyRow>(
        r#"
        SELECT s.id AS survey_id, s.title, s.description, sa.assigned_at,
               COALESCE(sr.is_completed, FALSE) AS is_completed
        FROM survey_assignments sa
        JOIN surveys s ON s.id = sa.survey_id
        LEFT JOIN survey_responses sr
               ON sr.survey_id = sa.survey_id AND sr.doctor_id = sa.doctor_id
        WHERE sa.doctor_id = $1
          AND ($2::portal_type IS NULL OR s.portal = $2)
        ORDER BY sa.assigned_at, s.id
        "#,
    )
    .bind(doctor_id)
    .bind(portal)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ============================================
// Responses and answers
// ============================================

pub async fn get_or_create_response(
    pool: &PgPool,
    doctor_id: Uuid,
    survey_id: i64,
) -> Result<ResponseRow> {
    let row = sqlx::query_as::<_, ResponseRow>(
        r#"
        INSERT INTO survey_responses (doctor_id, survey_id)
        VALUES ($1, $2)
        ON CONFLICT (doctor_id, survey_id) DO UPDATE SET doctor_id = EXCLUDED.doctor_id
        RETURNING id, doctor_id, survey_id, started_at, completed_at, is_completed
        "#,
    )
    .bind(doctor_id)
    .bind(survey_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn complete_response(pool: &PgPool, response_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE survey_responses SET is_completed = TRUE, completed_at = now() WHERE id = $1",
    )
    .bind(response_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_answers(pool: &PgPool, response_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM answers WHERE response_id = $1")
        .bind(response_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn upsert_answer(
    pool: &PgPool,
    response_id: Uuid,
    question_id: i64,
    value: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO answers (response_id, question_id, value)
        VALUES ($1, $2, $3)
        ON CONFLICT (response_id, question_id) DO UPDATE SET value = EXCLUDED.value
        "#,
    )
    .bind(response_id)
    .bind(question_id)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn answers_for(pool: &PgPool, response_id: Uuid) -> Result<Vec<AnswerRow>> {
    let rows = sqlx::query_as::<_, AnswerRow>(
        "SELECT question_id, value FROM answers WHERE response_id = $1",
    )
    .bind(response_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn completed_survey_ids(pool: &PgPool, doctor_id: Uuid) -> Result<HashSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT survey_id FROM survey_responses WHERE doctor_id = $1 AND is_completed",
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

pub async fn last_activity(pool: &PgPool, doctor_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT MAX(started_at) FROM survey_responses WHERE doctor_id = $1")
            .bind(doctor_id)
            .fetch_one(pool)
            .await?;
    Ok(ts)
}

// ============================================
// Funnel snapshot
// ============================================

/// Load the funnel inputs for a doctor and evaluate. These four reads are the
/// only queries the funnel ever needs.
pub async fn funnel_for(pool: &PgPool, doctor: &DoctorRow) -> Result<Funnel> {
    let profile = ProfileSnapshot::from(doctor);
    let agreement = find_agreement(pool, doctor.id).await?.map(|a| a.state());
    let assigned = assignments_for(pool, doctor.id).await?;
    let completed = completed_survey_ids(pool, doctor.id).await?;
    Ok(funnel::evaluate(
        &profile,
        agreement.as_ref(),
        &assigned,
        &completed,
    ))
}

// ============================================
// Admin aggregates
// ============================================

#[derive(Debug, Serialize, FromRow)]
pub struct SurveyCountsRow {
    pub doctor_id: Uuid,
    pub assigned: i64,
    pub completed: i64,
    pub in_progress: i64,
}

pub async fn doctor_survey_counts(pool: &PgPool) -> Result<Vec<SurveyCountsRow>> {
    let rows = sqlx::query_as::<_, SurveyCountsRow>(
        r#"
        SELECT d.id AS doctor_id,
               COUNT(DISTINCT sa.survey_id) AS assigned,
               COUNT(DISTINCT sr.survey_id) FILTER (WHERE sr.is_completed) AS completed,
               COUNT(DISTINCT sr.survey_id) FILTER (WHERE NOT sr.is_completed) AS in_progress
        FROM doctors d
        LEFT JOIN survey_assignments sa ON sa.doctor_id = d.id
        LEFT JOIN survey_responses sr ON sr.doctor_id = d.id
        GROUP BY d.id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_doctors(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doctors")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// (CP, GC) doctor counts.
pub async fn portal_split(pool: &PgPool) -> Result<(i64, i64)> {
    let split: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE portal = 'CP'),
               COUNT(*) FILTER (WHERE portal = 'GC')
        FROM doctors
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otp(age_secs: i64, attempts: i16) -> OtpRow {
        OtpRow {
            mobile: "9876543210".into(),
            code: "123456".into(),
            portal: None,
            attempts,
            verified: false,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn otp_expires_after_five_minutes() {
        let now = Utc::now();
        assert!(!otp(299, 0).is_expired(now));
        assert!(otp(301, 0).is_expired(now));
    }

    #[test]
    fn otp_attempt_budget() {
        assert!(!otp(0, 4).attempts_exhausted());
        assert!(otp(0, 5).attempts_exhausted());
    }

    #[test]
    fn agreement_signed_requires_both_fields() {
        let mut row = AgreementRow {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            survey_id: None,
            agreement_text: String::new(),
            signature: Some("data:image/png;base64,...".into()),
            kind: SignatureKind::Drawn,
            amount: 10000,
            ip_address: None,
            user_agent: None,
            signed_at: None,
        };
        assert!(!row.is_signed());
        row.signed_at = Some(Utc::now());
        assert!(row.is_signed());
        row.signature = None;
        assert!(!row.is_signed());
    }
}
