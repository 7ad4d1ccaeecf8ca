use crate::db;
use crate::domain::normalize;
use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

/// Idempotent startup seed: a staff login and one demo survey so a fresh
/// deployment is immediately usable.
pub async fn seed_all(pool: &PgPool) -> Result<()> {
    seed_staff(pool).await?;
    seed_demo_survey(pool).await?;
    Ok(())
}

async fn seed_staff(pool: &PgPool) -> Result<()> {
    let staff_mobile = match std::env::var("STAFF_MOBILE") {
        Ok(m) if !m.trim().is_empty() => m,
        _ => return Ok(()),
    };
    let doctor = db::get_or_create_doctor(pool, staff_mobile.trim(), None).await?;
    if !doctor.is_staff {
        sqlx::query("UPDATE doctors SET is_staff = TRUE WHERE id = $1")
            .bind(doctor.id)
            .execute(pool)
            .await?;
        tracing::info!("Seeded staff access for {}", staff_mobile);
    }
    Ok(())
}

async fn seed_demo_survey(pool: &PgPool) -> Result<()> {
    if db::find_survey_by_title(pool, "Inclinic experience of Topical Sunscreen in Paediatric")
        .await?
        .is_some()
    {
        return Ok(());
    }

    // Runs through the same normalizer as uploaded definitions.
    let definition = json!({
        "title": "Inclinic experience of Topical Sunscreen in Paediatric",
        "description": "Prescribing patterns for paediatric sunscreen use.",
        "questions": [
            {
                "text": "How often do you recommend sunscreen for paediatric patients?",
                "type": "single",
                "options": "Always,Often,Sometimes,Rarely,Never"
            },
            {
                "text": "Which attributes matter most when choosing a formulation?",
                "type": "multi",
                "options": ["Mineral filters", "Fragrance-free", "Water resistance", "Broad-spectrum", "SPF value"]
            },
            {
                "text": "Any additional observations from your practice?",
                "type": "paragraph",
                "required": false
            }
        ]
    });
    let survey = normalize::normalize_survey(&definition)?;
    let row = db::upsert_survey(pool, &survey.title, &survey.description, None).await?;
    db::replace_questions(pool, row.id, &survey.questions).await?;
    tracing::info!("Seeded demo survey '{}' ({} questions)", row.title, survey.questions.len());
    Ok(())
}
