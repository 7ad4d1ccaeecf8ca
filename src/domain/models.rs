use serde::{Deserialize, Serialize};

/// Participant cohort. Affects which surveys a doctor sees by default.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "portal_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PortalType {
    Cp,
    Gc,
}

impl PortalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortalType::Cp => "CP",
            PortalType::Gc => "GC",
        }
    }
}

impl TryFrom<&str> for PortalType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_uppercase().as_str() {
            "CP" => Ok(PortalType::Cp),
            "GC" => Ok(PortalType::Gc),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "signature_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    Drawn,
    Typed,
}

/// Canonical question kinds. Uploaded survey definitions may use any of the
/// alias spellings accepted by [`QuestionKind::from_alias`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Textarea,
    Radio,
    Checkbox,
    YesNo,
    Rating,
    Number,
    Email,
    Phone,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Text => "text",
            QuestionKind::Textarea => "textarea",
            QuestionKind::Radio => "radio",
            QuestionKind::Checkbox => "checkbox",
            QuestionKind::YesNo => "yesno",
            QuestionKind::Rating => "rating",
            QuestionKind::Number => "number",
            QuestionKind::Email => "email",
            QuestionKind::Phone => "phone",
        }
    }

    /// Resolve a raw type string, accepting the alias spellings seen in
    /// uploaded definitions. Unknown spellings resolve to `None`; the caller
    /// picks the fallback.
    pub fn from_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "text" => Some(QuestionKind::Text),
            "textarea" | "longtext" | "paragraph" => Some(QuestionKind::Textarea),
            "radio" | "mcq" | "single" | "single_choice" => Some(QuestionKind::Radio),
            "checkbox" | "multiple" | "multi" | "multi_select" => Some(QuestionKind::Checkbox),
            "yesno" | "yes/no" | "yes_no" | "yn" => Some(QuestionKind::YesNo),
            "rating" => Some(QuestionKind::Rating),
            "number" => Some(QuestionKind::Number),
            "email" => Some(QuestionKind::Email),
            "phone" => Some(QuestionKind::Phone),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_round_trip() {
        assert_eq!(PortalType::try_from("cp"), Ok(PortalType::Cp));
        assert_eq!(PortalType::try_from(" GC "), Ok(PortalType::Gc));
        assert!(PortalType::try_from("XX").is_err());
        assert_eq!(PortalType::Cp.as_str(), "CP");
    }

    #[test]
    fn question_kind_aliases() {
        assert_eq!(QuestionKind::from_alias("single"), Some(QuestionKind::Radio));
        assert_eq!(QuestionKind::from_alias("MULTI"), Some(QuestionKind::Checkbox));
        assert_eq!(QuestionKind::from_alias("yes/no"), Some(QuestionKind::YesNo));
        assert_eq!(QuestionKind::from_alias("paragraph"), Some(QuestionKind::Textarea));
        assert_eq!(QuestionKind::from_alias("hologram"), None);
    }

    #[test]
    fn canonical_spelling_is_its_own_alias() {
        for kind in [
            QuestionKind::Text,
            QuestionKind::Textarea,
            QuestionKind::Radio,
            QuestionKind::Checkbox,
            QuestionKind::YesNo,
            QuestionKind::Rating,
            QuestionKind::Number,
            QuestionKind::Email,
            QuestionKind::Phone,
        ] {
            assert_eq!(QuestionKind::from_alias(kind.as_str()), Some(kind));
        }
    }
}
