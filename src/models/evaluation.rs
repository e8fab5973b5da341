// src/models/evaluation.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::user::UserRole;

/// Role of a user inside one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "participant_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Candidat,
    Evaluator,
}

impl From<ParticipantRole> for UserRole {
    fn from(role: ParticipantRole) -> Self {
        match role {
            ParticipantRole::Candidat => UserRole::Candidat,
            ParticipantRole::Evaluator => UserRole::Evaluator,
        }
    }
}

/// Relationship of an evaluator to the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "evaluator_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorType {
    DirectManager,
    DirectColleague,
    Peer,
    Other,
}

/// Report bucket key for the candidate's self-assessment.
pub const CANDIDATE_BUCKET: &str = "CANDIDAT";

/// The one table between stored evaluator types and client-facing report keys,
/// with display labels, in report column order.
const REPORT_KEYS: [(EvaluatorType, &str, &str, &str); 4] = [
    (EvaluatorType::DirectManager, "DIRECT_MANAGER", "MANAGER", "Manager"),
    (EvaluatorType::Peer, "PEER", "PAIR", "Pairs"),
    (EvaluatorType::DirectColleague, "DIRECT_COLLEAGUE", "SUBORDONNES", "Subordonnés"),
    (EvaluatorType::Other, "OTHER", "AUTRES", "Autres"),
];

impl EvaluatorType {
    pub fn report_key(self) -> &'static str {
        REPORT_KEYS
            .iter()
            .find(|(t, ..)| *t == self)
            .map(|(_, _, key, _)| *key)
            .unwrap_or("AUTRES")
    }

    pub fn from_report_key(key: &str) -> Option<Self> {
        REPORT_KEYS
            .iter()
            .find(|(_, _, k, _)| *k == key)
            .map(|(t, ..)| *t)
    }

    /// Accepts the stored name (`PEER`) as well as the report key (`PAIR`).
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        REPORT_KEYS
            .iter()
            .find(|(_, stored, _, _)| *stored == upper)
            .map(|(t, ..)| *t)
            .or_else(|| Self::from_report_key(&upper))
    }
}

/// Every report bucket key with its display label, candidate last.
pub fn report_buckets() -> impl Iterator<Item = (&'static str, &'static str)> {
    REPORT_KEYS
        .iter()
        .map(|(_, _, key, label)| (*key, *label))
        .chain(std::iter::once((CANDIDATE_BUCKET, "Soi")))
}

/// Represents the 'evaluations' table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: i64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub quiz_id: Option<i64>,
    pub deadline: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const EVALUATION_COLUMNS: &str =
    "id, reference, quiz_id, deadline, completed_at, is_completed, created_at, updated_at";

/// Represents the 'evaluation_participants' table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub evaluation_id: i64,
    pub user_id: i64,
    pub participant_role: ParticipantRole,
    pub evaluator_type: Option<EvaluatorType>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mail_sent_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const PARTICIPANT_COLUMNS: &str = "id, evaluation_id, user_id, participant_role, \
     evaluator_type, completed_at, mail_sent_at, reminder_sent_at, created_at";

/// Participant joined with the public part of its user.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantWithUser {
    pub id: i64,
    pub evaluation_id: i64,
    pub user_id: i64,
    pub participant_role: ParticipantRole,
    pub evaluator_type: Option<EvaluatorType>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mail_sent_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub post: Option<String>,
    #[serde(skip)]
    pub is_first_login: bool,
}

pub const PARTICIPANT_WITH_USER_SELECT: &str = r#"
    SELECT p.id, p.evaluation_id, p.user_id, p.participant_role, p.evaluator_type,
           p.completed_at, p.mail_sent_at, p.reminder_sent_at,
           u.name, u.email, u.phone, u.post, u.is_first_login
    FROM evaluation_participants p
    JOIN users u ON u.id = p.user_id
"#;

/// Progress of the evaluators of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationProgress {
    pub evaluators_count: i64,
    pub completed_evaluators: i64,
    pub progress_percentage: i64,
}

impl EvaluationProgress {
    pub fn from_participants<'a, I>(participants: I) -> Self
    where
        I: IntoIterator<Item = (&'a ParticipantRole, &'a Option<DateTime<Utc>>)>,
    {
        let (mut total, mut done) = (0i64, 0i64);
        for (role, completed_at) in participants {
            if *role == ParticipantRole::Evaluator {
                total += 1;
                if completed_at.is_some() {
                    done += 1;
                }
            }
        }
        let progress_percentage = if total > 0 {
            ((done as f64 / total as f64) * 100.0).round() as i64
        } else {
            0
        };
        Self {
            evaluators_count: total,
            completed_evaluators: done,
            progress_percentage,
        }
    }
}

/// Listing entry: evaluation plus roster and progress.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub participants: Vec<ParticipantWithUser>,
    pub candidat: Option<CandidateInfo>,
    #[serde(flatten)]
    pub progress: EvaluationProgress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
}

impl EvaluationSummary {
    pub fn new(evaluation: Evaluation, participants: Vec<ParticipantWithUser>) -> Self {
        let progress = EvaluationProgress::from_participants(
            participants.iter().map(|p| (&p.participant_role, &p.completed_at)),
        );
        let candidat = participants
            .iter()
            .find(|p| p.participant_role == ParticipantRole::Candidat)
            .map(|p| CandidateInfo {
                id: p.user_id,
                name: p.name.clone(),
                email: p.email.clone(),
            });
        Self {
            evaluation,
            participants,
            candidat,
            progress,
        }
    }
}

/// An evaluation seen from one of its participants.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEvaluation {
    #[serde(flatten)]
    pub summary: EvaluationSummary,
    pub current_participant_id: Option<i64>,
}

impl ParticipantEvaluation {
    pub fn for_user(summary: EvaluationSummary, user_id: i64) -> Self {
        let current_participant_id = summary
            .participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.id);
        Self {
            summary,
            current_participant_id,
        }
    }
}

/// Accepts either a full RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_evaluator_type<'de, D>(deserializer: D) -> Result<Option<EvaluatorType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => EvaluatorType::parse(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown evaluator type '{}'", s))),
    }
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", s))),
    }
}

/// DTO for creating an evaluation.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvaluationRequest {
    #[serde(rename = "ref")]
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
    #[serde(default, deserialize_with = "deserialize_date")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_date")]
    pub completed_at: Option<DateTime<Utc>>,
    pub quiz_id: Option<i64>,
}

/// DTO for updating an evaluation. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvaluationRequest {
    #[serde(rename = "ref")]
    #[validate(length(min = 1, max = 100))]
    pub reference: Option<String>,
    #[serde(default, deserialize_with = "deserialize_date")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_date")]
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: Option<bool>,
    pub quiz_id: Option<i64>,
}

impl UpdateEvaluationRequest {
    pub fn is_empty(&self) -> bool {
        self.reference.is_none()
            && self.deadline.is_none()
            && self.completed_at.is_none()
            && self.is_completed.is_none()
            && self.quiz_id.is_none()
    }
}

/// DTO for adding a participant (creates the user when the email is unknown).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub role: ParticipantRole,
    pub post: Option<String>,
    #[serde(default, deserialize_with = "deserialize_evaluator_type")]
    pub evaluator_type: Option<EvaluatorType>,
    #[validate(range(min = 1))]
    pub evaluation_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluator_type_mapping_is_bidirectional() {
        for t in [
            EvaluatorType::DirectManager,
            EvaluatorType::DirectColleague,
            EvaluatorType::Peer,
            EvaluatorType::Other,
        ] {
            assert_eq!(EvaluatorType::from_report_key(t.report_key()), Some(t));
        }
        assert_eq!(EvaluatorType::Peer.report_key(), "PAIR");
        assert_eq!(EvaluatorType::DirectColleague.report_key(), "SUBORDONNES");
        assert_eq!(EvaluatorType::from_report_key(CANDIDATE_BUCKET), None);
    }

    #[test]
    fn participant_input_takes_either_name() {
        let by_key: AddParticipantRequest = serde_json::from_str(
            r#"{"name":"Bo","email":"bo@example.com","role":"EVALUATOR","evaluatorType":"pair","evaluationId":1}"#,
        )
        .unwrap();
        assert_eq!(by_key.evaluator_type, Some(EvaluatorType::Peer));

        let by_name: AddParticipantRequest = serde_json::from_str(
            r#"{"name":"Bo","email":"bo@example.com","role":"EVALUATOR","evaluatorType":"DIRECT_MANAGER","evaluationId":1}"#,
        )
        .unwrap();
        assert_eq!(by_name.evaluator_type, Some(EvaluatorType::DirectManager));

        let missing: AddParticipantRequest = serde_json::from_str(
            r#"{"name":"Bo","email":"bo@example.com","role":"CANDIDAT","evaluatorType":null,"evaluationId":1}"#,
        )
        .unwrap();
        assert!(missing.evaluator_type.is_none());

        assert!(
            serde_json::from_str::<AddParticipantRequest>(
                r#"{"name":"Bo","email":"bo@example.com","role":"EVALUATOR","evaluatorType":"BOSS","evaluationId":1}"#,
            )
            .is_err()
        );
    }

    #[test]
    fn buckets_end_with_candidate() {
        let keys: Vec<_> = report_buckets().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["MANAGER", "PAIR", "SUBORDONNES", "AUTRES", "CANDIDAT"]);
    }

    #[test]
    fn progress_counts_only_evaluators() {
        let now = Some(Utc::now());
        let rows = vec![
            (ParticipantRole::Candidat, now),
            (ParticipantRole::Evaluator, now),
            (ParticipantRole::Evaluator, None),
            (ParticipantRole::Evaluator, None),
        ];
        let progress = EvaluationProgress::from_participants(rows.iter().map(|(r, c)| (r, c)));
        assert_eq!(progress.evaluators_count, 3);
        assert_eq!(progress.completed_evaluators, 1);
        assert_eq!(progress.progress_percentage, 33);
    }

    #[test]
    fn progress_without_evaluators_is_zero() {
        let progress = EvaluationProgress::from_participants(std::iter::empty());
        assert_eq!(progress.progress_percentage, 0);
    }

    #[test]
    fn parses_bare_and_full_dates() {
        let bare = parse_date("2025-10-31").unwrap();
        assert_eq!(bare.to_rfc3339(), "2025-10-31T00:00:00+00:00");
        let full = parse_date("2025-10-31T12:30:00Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2025-10-31T12:30:00+00:00");
        assert!(parse_date("tomorrow").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn create_request_accepts_bare_deadline() {
        let req: CreateEvaluationRequest =
            serde_json::from_str(r#"{"ref":"EV-1","deadline":"2026-01-15"}"#).unwrap();
        assert_eq!(req.reference, "EV-1");
        assert!(req.deadline.is_some());
        assert!(req.completed_at.is_none());
    }
}
