//! Batch roster import for the admin side.
//!
//! Exports from the field teams arrive as spreadsheet rows converted to JSON
//! objects, and the column headers vary by team. Header matching is
//! best-effort over declarative alias tables; a row that yields no mobile
//! number cannot be keyed and is skipped.

use crate::db;
use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

const NAME_KEYS: &[&str] = &["name", "doctor_name", "doctor", "dr_name", "full_name"];
const MOBILE_KEYS: &[&str] = &[
    "mobile",
    "mobile_no",
    "phone",
    "phone_number",
    "contact",
    "contact_no",
];
const EMAIL_KEYS: &[&str] = &["email", "email_id", "mail"];
const SURVEY_KEYS: &[&str] = &["survey", "survey_name", "survey_title"];
const AMOUNT_KEYS: &[&str] = &["amount", "agreement_amount", "compensation", "honorarium"];
const TERRITORY_KEYS: &[&str] = &["territory", "location", "city"];
const MANAGER_KEYS: &[&str] = &["manager", "zsm", "bdm", "emp1_name", "emp2_name"];

#[derive(Debug, PartialEq, Eq)]
pub struct RosterRow {
    pub mobile: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub survey: Option<String>,
    pub amount: Option<i32>,
    pub territory: Option<String>,
    pub manager: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Keep digits only; anything that does not leave a plausible mobile number
/// is rejected.
pub fn normalize_mobile(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (10..=15).contains(&digits.len()).then_some(digits)
}

/// "Dr. Asha Verma" -> ("Asha", "Verma").
pub fn split_name(raw: &str) -> (String, String) {
    let mut tokens: Vec<&str> = raw.split_whitespace().collect();
    if let Some(first) = tokens.first() {
        if first.trim_end_matches('.').eq_ignore_ascii_case("dr") {
            tokens.remove(0);
        }
    }
    match tokens.split_first() {
        Some((first, rest)) => (first.to_string(), rest.join(" ")),
        None => (String::new(), String::new()),
    }
}

/// Resolve one uploaded row against the alias tables. `None` means the row
/// carries no usable mobile number.
pub fn resolve_row(obj: &Map<String, Value>) -> Option<RosterRow> {
    let fields: Map<String, Value> = obj
        .iter()
        .map(|(k, v)| (normalize_header(k), v.clone()))
        .collect();

    let mobile = lookup(&fields, MOBILE_KEYS).and_then(|m| normalize_mobile(&m))?;

    Some(RosterRow {
        mobile,
        name: lookup(&fields, NAME_KEYS),
        email: lookup(&fields, EMAIL_KEYS),
        survey: lookup(&fields, SURVEY_KEYS),
        amount: lookup(&fields, AMOUNT_KEYS).and_then(|a| a.trim().parse().ok()),
        territory: lookup(&fields, TERRITORY_KEYS),
        manager: lookup(&fields, MANAGER_KEYS),
    })
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace([' ', '-', '.'], "_")
        .replace("__", "_")
}

fn lookup(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        fields.get(*k).and_then(|v| {
            let s = match v {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            (!s.is_empty()).then_some(s)
        })
    })
}

/// Import a batch of roster rows. Per-row failures are logged and counted,
/// never fatal; a named survey is created on demand and assigned.
pub async fn import_roster(pool: &PgPool, rows: &[Value]) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (idx, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            tracing::warn!("Import row {} is not an object, skipping", idx + 1);
            summary.skipped += 1;
            continue;
        };
        let Some(resolved) = resolve_row(obj) else {
            tracing::warn!("Import row {} has no mobile number, skipping", idx + 1);
            summary.skipped += 1;
            continue;
        };

        match import_row(pool, &resolved).await {
            Ok(doctor_id) => {
                tracing::debug!("Imported roster row {} as doctor {}", idx + 1, doctor_id);
                summary.imported += 1;
            }
            Err(e) => {
                tracing::error!("Import row {} failed: {}", idx + 1, e);
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        "Roster import finished: {} imported, {} skipped",
        summary.imported,
        summary.skipped
    );
    Ok(summary)
}

async fn import_row(pool: &PgPool, row: &RosterRow) -> Result<Uuid> {
    let (first_name, last_name) = row
        .name
        .as_deref()
        .map(split_name)
        .unwrap_or_default();

    // Imported values never clobber what a doctor already filled in.
    let doctor_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO doctors (mobile, first_name, last_name, email, city, territory, manager, agreement_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (mobile) DO UPDATE SET
            first_name = COALESCE(NULLIF(doctors.first_name, ''), EXCLUDED.first_name),
            last_name = COALESCE(NULLIF(doctors.last_name, ''), EXCLUDED.last_name),
            email = COALESCE(NULLIF(doctors.email, ''), EXCLUDED.email),
            city = COALESCE(NULLIF(doctors.city, ''), EXCLUDED.city),
            territory = COALESCE(NULLIF(doctors.territory, ''), EXCLUDED.territory),
            manager = COALESCE(NULLIF(doctors.manager, ''), EXCLUDED.manager),
            agreement_amount = COALESCE(doctors.agreement_amount, EXCLUDED.agreement_amount),
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(&row.mobile)
    .bind(&first_name)
    .bind(&last_name)
    .bind(row.email.as_deref().unwrap_or(""))
    .bind(row.territory.as_deref().unwrap_or(""))
    .bind(row.territory.as_deref().unwrap_or(""))
    .bind(row.manager.as_deref().unwrap_or(""))
    .bind(row.amount)
    .fetch_one(pool)
    .await?;

    if let Some(title) = &row.survey {
        let survey = db::upsert_survey(pool, title, "", None).await?;
        db::assign_survey(pool, doctor_id, survey.id).await?;
    }

    Ok(doctor_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn mobile_normalization() {
        assert_eq!(normalize_mobile("+91 98765-43210"), Some("919876543210".into()));
        assert_eq!(normalize_mobile("9876543210"), Some("9876543210".into()));
        assert_eq!(normalize_mobile("12345"), None);
        assert_eq!(normalize_mobile("not a number"), None);
    }

    #[test]
    fn header_aliases_resolve() {
        let row = resolve_row(&obj(json!({
            "Doctor Name": "Dr. Asha Verma",
            "Phone Number": "98765 43210",
            "Email ID": "asha@example.com",
            "Survey Name": "Sunscreen study",
            "Honorarium": "20000",
            "ZSM": "R. Iyer"
        })))
        .unwrap();

        assert_eq!(row.mobile, "9876543210");
        assert_eq!(row.name.as_deref(), Some("Dr. Asha Verma"));
        assert_eq!(row.email.as_deref(), Some("asha@example.com"));
        assert_eq!(row.survey.as_deref(), Some("Sunscreen study"));
        assert_eq!(row.amount, Some(20000));
        assert_eq!(row.manager.as_deref(), Some("R. Iyer"));
    }

    #[test]
    fn numeric_cells_are_accepted() {
        let row = resolve_row(&obj(json!({"mobile": 9876543210i64, "amount": 10000}))).unwrap();
        assert_eq!(row.mobile, "9876543210");
        assert_eq!(row.amount, Some(10000));
    }

    #[test]
    fn rows_without_mobile_are_dropped() {
        assert!(resolve_row(&obj(json!({"name": "Dr. X", "email": "x@y.z"}))).is_none());
        assert!(resolve_row(&obj(json!({"mobile": "12"}))).is_none());
    }

    #[test]
    fn name_splitting_strips_honorific() {
        assert_eq!(split_name("Dr. Asha Verma"), ("Asha".into(), "Verma".into()));
        assert_eq!(split_name("dr Ravi"), ("Ravi".into(), String::new()));
        assert_eq!(split_name("Meena K Rao"), ("Meena".into(), "K Rao".into()));
        // Only the standalone honorific is stripped.
        assert_eq!(split_name("Drew Smith"), ("Drew".into(), "Smith".into()));
    }
}
