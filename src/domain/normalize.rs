//! Normalization of uploaded survey definitions.
//!
//! Definitions arrive as JSON written by several generations of tooling, so
//! the same field goes by different names from file to file. Rather than
//! sniffing shapes ad hoc, every lookup walks a declarative alias table in
//! fixed priority order; the first present, non-empty candidate wins. The
//! output is canonical and re-normalizing it is a no-op.

use crate::domain::models::QuestionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TITLE_KEYS: &[&str] = &["title", "survey_title", "name"];
const DESCRIPTION_KEYS: &[&str] = &["description", "desc"];
const QUESTION_LIST_KEYS: &[&str] = &["questions", "Questions", "items", "fields", "form"];
const TEXT_KEYS: &[&str] = &["question_text", "question", "text", "label", "title"];
const KIND_KEYS: &[&str] = &["question_type", "type", "input"];
const OPTIONS_KEYS: &[&str] = &["options", "choices", "values", "data"];
const REQUIRED_KEYS: &[&str] = &["required", "is_required"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("survey definition must be a JSON object or an array of objects")]
    NotAnObject,
    #[error("survey definition is missing a title")]
    MissingTitle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedQuestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub required: bool,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedSurvey {
    pub title: String,
    pub description: String,
    pub questions: Vec<NormalizedQuestion>,
}

/// Normalize one survey definition object.
pub fn normalize_survey(value: &Value) -> Result<NormalizedSurvey, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;

    let title = first_string(value, TITLE_KEYS).ok_or(NormalizeError::MissingTitle)?;
    let description = first_string(value, DESCRIPTION_KEYS).unwrap_or_default();

    let list = QUESTION_LIST_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array));

    let mut questions = Vec::new();
    for raw in list.map(|l| l.as_slice()).unwrap_or_default() {
        if let Some(q) = normalize_question(raw, questions.len() as i32) {
            questions.push(q);
        }
    }

    Ok(NormalizedSurvey {
        title,
        description,
        questions,
    })
}

fn normalize_question(raw: &Value, position: i32) -> Option<NormalizedQuestion> {
    if !raw.is_object() {
        tracing::warn!("skipping non-object question entry at position {position}");
        return None;
    }

    let Some(text) = first_string(raw, TEXT_KEYS) else {
        tracing::warn!("skipping question without resolvable text: {raw}");
        return None;
    };

    let raw_kind = first_string(raw, KIND_KEYS);
    let options = OPTIONS_KEYS
        .iter()
        .find_map(|k| raw.get(*k))
        .map(extract_options)
        .unwrap_or_default();

    // No declared kind but options present means single choice.
    let kind = match &raw_kind {
        Some(s) => QuestionKind::from_alias(s).unwrap_or(QuestionKind::Text),
        None if !options.is_empty() => QuestionKind::Radio,
        None => QuestionKind::Text,
    };

    let required = REQUIRED_KEYS
        .iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_bool))
        .unwrap_or(true);

    Some(NormalizedQuestion {
        text,
        kind,
        options,
        required,
        position,
    })
}

/// Options may arrive as a list, a comma-separated string, or an object.
/// Object extraction priority: `questions` list, `options` list, all-string
/// values, then keys.
fn extract_options(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Object(map) => {
            for key in ["questions", "options"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().map(value_to_string).collect();
                }
            }
            if map.values().all(|v| v.is_string()) {
                map.values().map(value_to_string).collect()
            } else {
                map.keys().cloned().collect()
            }
        }
        _ => Vec::new(),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First present, non-empty string among the candidate keys.
fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    let obj = value.as_object()?;
    keys.iter().find_map(|k| {
        obj.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_alias_and_comma_options() {
        let input = json!({
            "name": "Intake",
            "items": [
                {"question": "Age?", "type": "single", "options": "18,25,30"}
            ]
        });
        let survey = normalize_survey(&input).unwrap();
        assert_eq!(survey.title, "Intake");
        assert_eq!(survey.questions.len(), 1);
        let q = &survey.questions[0];
        assert_eq!(q.text, "Age?");
        assert_eq!(q.kind, QuestionKind::Radio);
        assert_eq!(q.options, vec!["18", "25", "30"]);
        assert!(q.required);
        assert_eq!(q.position, 0);
    }

    #[test]
    fn missing_title_is_an_error() {
        let input = json!({"questions": []});
        assert_eq!(normalize_survey(&input), Err(NormalizeError::MissingTitle));
    }

    #[test]
    fn key_priority_is_fixed() {
        // Both `question_text` and `label` present: the earlier alias wins.
        let input = json!({
            "title": "T",
            "fields": [
                {"question_text": "primary", "label": "secondary"}
            ]
        });
        let survey = normalize_survey(&input).unwrap();
        assert_eq!(survey.questions[0].text, "primary");
    }

    #[test]
    fn unknown_kind_defaults_to_text() {
        let input = json!({
            "title": "T",
            "questions": [{"text": "Q", "type": "matrix"}]
        });
        let survey = normalize_survey(&input).unwrap();
        assert_eq!(survey.questions[0].kind, QuestionKind::Text);
    }

    #[test]
    fn options_without_kind_imply_radio() {
        let input = json!({
            "title": "T",
            "questions": [{"text": "Q", "choices": ["a", "b"]}]
        });
        let survey = normalize_survey(&input).unwrap();
        assert_eq!(survey.questions[0].kind, QuestionKind::Radio);
        assert_eq!(survey.questions[0].options, vec!["a", "b"]);
    }

    #[test]
    fn object_options_extraction_priority() {
        let nested = json!({
            "title": "T",
            "questions": [{"text": "Q", "options": {"questions": ["x", "y"], "options": ["z"]}}]
        });
        let survey = normalize_survey(&nested).unwrap();
        assert_eq!(survey.questions[0].options, vec!["x", "y"]);

        let strings = json!({
            "title": "T",
            "questions": [{"text": "Q", "options": {"a": "Apple", "b": "Banana"}}]
        });
        let survey = normalize_survey(&strings).unwrap();
        assert_eq!(survey.questions[0].options, vec!["Apple", "Banana"]);

        let mixed = json!({
            "title": "T",
            "questions": [{"text": "Q", "options": {"a": 1, "b": 2}}]
        });
        let survey = normalize_survey(&mixed).unwrap();
        assert_eq!(survey.questions[0].options, vec!["a", "b"]);
    }

    #[test]
    fn textless_questions_are_skipped_and_positions_stay_dense() {
        let input = json!({
            "title": "T",
            "questions": [
                {"type": "text"},
                {"text": "kept"}
            ]
        });
        let survey = normalize_survey(&input).unwrap();
        assert_eq!(survey.questions.len(), 1);
        assert_eq!(survey.questions[0].text, "kept");
        assert_eq!(survey.questions[0].position, 0);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = json!({
            "survey_title": "Round trip",
            "desc": "d",
            "items": [
                {"question": "Age?", "type": "single", "options": "18,25,30"},
                {"label": "Notes", "input": "paragraph", "is_required": false}
            ]
        });
        let once = normalize_survey(&input).unwrap();
        let again = normalize_survey(&serde_json::to_value(&once).unwrap()).unwrap();
        assert_eq!(once, again);
    }
}
