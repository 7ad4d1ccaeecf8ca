//! Onboarding funnel evaluation.
//!
//! Every authenticated page load and every mutating step (profile save,
//! agreement signing, survey submit) re-evaluates the funnel to decide the
//! single next destination for the doctor. The evaluator is a pure function
//! over a snapshot the caller has already loaded; it never queries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Profile fields that gate onboarding. Whitespace-only values count as empty.
#[derive(Debug, Clone, Default)]
pub struct ProfileSnapshot {
    pub first_name: String,
    pub email: String,
    pub profession: String,
    pub specialty: String,
    pub address: String,
    pub city: String,
    pub state: String,
}

impl ProfileSnapshot {
    /// Complete iff name, email, (profession OR specialty), address, city and
    /// state are all present.
    pub fn is_complete(&self) -> bool {
        let filled = |s: &str| !s.trim().is_empty();
        filled(&self.first_name)
            && filled(&self.email)
            && (filled(&self.profession) || filled(&self.specialty))
            && filled(&self.address)
            && filled(&self.city)
            && filled(&self.state)
    }
}

/// What exists of the doctor's agreement row, if anything. A row created as a
/// side effect of an upsert may carry neither field; it only counts as signed
/// when both are present.
#[derive(Debug, Clone, Copy)]
pub struct AgreementState {
    pub has_signature: bool,
    pub signed_at: Option<DateTime<Utc>>,
}

impl AgreementState {
    pub fn is_signed(&self) -> bool {
        self.has_signature && self.signed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssignedSurvey {
    pub survey_id: i64,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NeedsProfile,
    NeedsAgreement,
    NeedsSurvey,
    Complete,
}

/// Where to send the doctor next. Serialized tagged so the frontend can route
/// on `kind` alone.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    ProfileEdit,
    ProfileView,
    Agreement { survey_id: i64 },
    Survey { survey_id: i64 },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Funnel {
    pub verdict: Verdict,
    pub destination: Destination,
}

/// Evaluate the funnel gates in strict priority order: profile, agreement,
/// pending surveys, done. Exactly one verdict comes back.
///
/// Pending surveys are ordered by assignment time ascending (ties by survey
/// id), so the doctor is always pointed at the longest-waiting survey first.
pub fn evaluate(
    profile: &ProfileSnapshot,
    agreement: Option<&AgreementState>,
    assigned: &[AssignedSurvey],
    completed: &HashSet<i64>,
) -> Funnel {
    if !profile.is_complete() {
        return Funnel {
            verdict: Verdict::NeedsProfile,
            destination: Destination::ProfileEdit,
        };
    }

    if !agreement.map(AgreementState::is_signed).unwrap_or(false) {
        // The agreement page targets the most recently assigned survey; with
        // nothing assigned yet the doctor stays on their profile.
        let destination = assigned
            .iter()
            .max_by_key(|a| (a.assigned_at, a.survey_id))
            .map(|a| Destination::Agreement {
                survey_id: a.survey_id,
            })
            .unwrap_or(Destination::ProfileView);
        return Funnel {
            verdict: Verdict::NeedsAgreement,
            destination,
        };
    }

    let mut pending: Vec<&AssignedSurvey> = assigned
        .iter()
        .filter(|a| !completed.contains(&a.survey_id))
        .collect();
    pending.sort_by_key(|a| (a.assigned_at, a.survey_id));

    if let Some(next) = pending.first() {
        return Funnel {
            verdict: Verdict::NeedsSurvey,
            destination: Destination::Survey {
                survey_id: next.survey_id,
            },
        };
    }

    Funnel {
        verdict: Verdict::Complete,
        destination: Destination::ProfileView,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn complete_profile() -> ProfileSnapshot {
        ProfileSnapshot {
            first_name: "Asha".into(),
            email: "asha@example.com".into(),
            profession: "".into(),
            specialty: "Dermatology".into(),
            address: "12 Lake Rd".into(),
            city: "Pune".into(),
            state: "MH".into(),
        }
    }

    fn signed() -> AgreementState {
        AgreementState {
            has_signature: true,
            signed_at: Some(Utc::now()),
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn missing_city_blocks_everything_else() {
        let mut profile = complete_profile();
        profile.city.clear();
        let assigned = [AssignedSurvey {
            survey_id: 1,
            assigned_at: at(1),
        }];
        let out = evaluate(&profile, Some(&signed()), &assigned, &HashSet::new());
        assert_eq!(out.verdict, Verdict::NeedsProfile);
        assert_eq!(out.destination, Destination::ProfileEdit);
    }

    #[test]
    fn whitespace_fields_count_as_empty() {
        let mut profile = complete_profile();
        profile.state = "   ".into();
        let out = evaluate(&profile, Some(&signed()), &[], &HashSet::new());
        assert_eq!(out.verdict, Verdict::NeedsProfile);
    }

    #[test]
    fn profession_or_specialty_is_enough() {
        let mut profile = complete_profile();
        profile.specialty.clear();
        profile.profession = "Doctor".into();
        let out = evaluate(&profile, Some(&signed()), &[], &HashSet::new());
        assert_eq!(out.verdict, Verdict::Complete);
    }

    #[test]
    fn partial_agreement_is_not_signed() {
        // Signature saved but no timestamp: a half-written row must not pass.
        let agreement = AgreementState {
            has_signature: true,
            signed_at: None,
        };
        let out = evaluate(&complete_profile(), Some(&agreement), &[], &HashSet::new());
        assert_eq!(out.verdict, Verdict::NeedsAgreement);
    }

    #[test]
    fn agreement_destination_targets_latest_assignment() {
        let assigned = [
            AssignedSurvey {
                survey_id: 7,
                assigned_at: at(1),
            },
            AssignedSurvey {
                survey_id: 3,
                assigned_at: at(9),
            },
        ];
        let out = evaluate(&complete_profile(), None, &assigned, &HashSet::new());
        assert_eq!(out.verdict, Verdict::NeedsAgreement);
        assert_eq!(out.destination, Destination::Agreement { survey_id: 3 });
    }

    #[test]
    fn agreement_destination_without_assignments_falls_back() {
        let out = evaluate(&complete_profile(), None, &[], &HashSet::new());
        assert_eq!(out.verdict, Verdict::NeedsAgreement);
        assert_eq!(out.destination, Destination::ProfileView);
    }

    #[test]
    fn points_at_first_pending_survey() {
        let assigned = [
            AssignedSurvey {
                survey_id: 10, // survey A, already done
                assigned_at: at(1),
            },
            AssignedSurvey {
                survey_id: 11, // survey B, still open
                assigned_at: at(2),
            },
        ];
        let completed: HashSet<i64> = [10].into_iter().collect();
        let out = evaluate(&complete_profile(), Some(&signed()), &assigned, &completed);
        assert_eq!(out.verdict, Verdict::NeedsSurvey);
        assert_eq!(out.destination, Destination::Survey { survey_id: 11 });
    }

    #[test]
    fn pending_order_is_assignment_time_ascending() {
        let assigned = [
            AssignedSurvey {
                survey_id: 2,
                assigned_at: at(20),
            },
            AssignedSurvey {
                survey_id: 9,
                assigned_at: at(5),
            },
        ];
        let out = evaluate(&complete_profile(), Some(&signed()), &assigned, &HashSet::new());
        assert_eq!(out.destination, Destination::Survey { survey_id: 9 });
    }

    #[test]
    fn assignment_time_ties_break_by_survey_id() {
        let assigned = [
            AssignedSurvey {
                survey_id: 8,
                assigned_at: at(5),
            },
            AssignedSurvey {
                survey_id: 4,
                assigned_at: at(5),
            },
        ];
        let out = evaluate(&complete_profile(), Some(&signed()), &assigned, &HashSet::new());
        assert_eq!(out.destination, Destination::Survey { survey_id: 4 });
    }

    #[test]
    fn no_assigned_surveys_is_complete() {
        let out = evaluate(&complete_profile(), Some(&signed()), &[], &HashSet::new());
        assert_eq!(out.verdict, Verdict::Complete);
        assert_eq!(out.destination, Destination::ProfileView);
    }
}
