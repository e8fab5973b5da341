// src/services/notification.rs

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    config::Config,
    models::evaluation::{Evaluation, ParticipantRole, ParticipantWithUser},
    services::{
        emails::{self, InvitationContext},
        mailer::{MailError, SharedMailer},
        report::{load_evaluation, load_participants},
    },
    utils::hash::{generate_temp_password, hash_password},
};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Password error: {0}")]
    Password(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Invitation,
    Reminder,
}

/// Outcome of a batch of mails; individual failures never abort the batch.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub sent: Vec<i64>,
    pub failed: Vec<i64>,
}

/// Decides who gets an invitation after `added_id` joined the roster.
///
/// A new candidate is invited along with every evaluator not mailed yet. A new
/// evaluator is invited only if the evaluation already has a candidate; otherwise
/// the invitation waits for the candidate.
pub fn plan_invitations(added_id: i64, roster: &[ParticipantWithUser]) -> Vec<i64> {
    let Some(added) = roster.iter().find(|p| p.id == added_id) else {
        return Vec::new();
    };

    match added.participant_role {
        ParticipantRole::Candidat => std::iter::once(added.id)
            .chain(
                roster
                    .iter()
                    .filter(|p| {
                        p.id != added.id
                            && p.participant_role == ParticipantRole::Evaluator
                            && p.mail_sent_at.is_none()
                    })
                    .map(|p| p.id),
            )
            .collect(),
        ParticipantRole::Evaluator => {
            let has_candidate = roster
                .iter()
                .any(|p| p.participant_role == ParticipantRole::Candidat);
            if has_candidate { vec![added.id] } else { Vec::new() }
        }
    }
}

pub fn candidate_name(roster: &[ParticipantWithUser]) -> Option<&str> {
    roster
        .iter()
        .find(|p| p.participant_role == ParticipantRole::Candidat)
        .map(|p| p.name.as_str())
}

/// Sends one invitation or reminder and stamps the matching timestamp.
///
/// Invitations to users who never logged in carry a fresh temporary password,
/// which replaces the stored one.
pub async fn notify_participant(
    pool: &PgPool,
    mailer: &SharedMailer,
    config: &Config,
    evaluation: &Evaluation,
    participant: &ParticipantWithUser,
    candidate: Option<&str>,
    kind: MailKind,
) -> Result<(), NotifyError> {
    let temp_password = if kind == MailKind::Invitation && participant.is_first_login {
        let password = generate_temp_password();
        let hashed = hash_password(&password).map_err(|e| NotifyError::Password(format!("{:?}", e)))?;
        sqlx::query("UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2")
            .bind(hashed)
            .bind(participant.user_id)
            .execute(pool)
            .await?;
        Some(password)
    } else {
        None
    };

    let ctx = InvitationContext {
        recipient_name: &participant.name,
        recipient_email: &participant.email,
        role: participant.participant_role,
        evaluation_ref: &evaluation.reference,
        deadline: evaluation.deadline,
        candidate_name: candidate,
        temp_password: temp_password.as_deref(),
        frontend_url: &config.frontend_url,
    };

    let (mail, column) = match kind {
        MailKind::Invitation => (emails::invitation(&ctx), "mail_sent_at"),
        MailKind::Reminder => (emails::reminder(&ctx), "reminder_sent_at"),
    };

    mailer.send(mail).await?;

    sqlx::query(&format!(
        "UPDATE evaluation_participants SET {} = $2 WHERE id = $1",
        column
    ))
    .bind(participant.id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    tracing::info!(
        "{:?} sent to participant {} ({})",
        kind,
        participant.id,
        participant.email
    );
    Ok(())
}

/// Mails every participant in `ids`, logging failures instead of returning them.
pub async fn notify_many(
    pool: &PgPool,
    mailer: &SharedMailer,
    config: &Config,
    evaluation: &Evaluation,
    roster: &[ParticipantWithUser],
    ids: &[i64],
    kind: MailKind,
) -> NotificationSummary {
    let candidate = candidate_name(roster);
    let mut summary = NotificationSummary::default();

    for participant in roster.iter().filter(|p| ids.contains(&p.id)) {
        match notify_participant(pool, mailer, config, evaluation, participant, candidate, kind).await {
            Ok(()) => summary.sent.push(participant.id),
            Err(e) => {
                tracing::error!(
                    "{:?} to participant {} failed: {}",
                    kind,
                    participant.id,
                    e
                );
                summary.failed.push(participant.id);
            }
        }
    }
    summary
}

/// Runs the invitation rules after a participant was added.
pub async fn notify_after_add(
    pool: &PgPool,
    mailer: &SharedMailer,
    config: &Config,
    evaluation_id: i64,
    added_id: i64,
) -> NotificationSummary {
    let evaluation = match load_evaluation(pool, evaluation_id).await {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::error!("Could not load evaluation {}: {}", evaluation_id, e);
            return NotificationSummary::default();
        }
    };
    let roster = match load_participants(pool, evaluation_id).await {
        Ok(roster) => roster,
        Err(e) => {
            tracing::error!("Could not load roster of evaluation {}: {}", evaluation_id, e);
            return NotificationSummary::default();
        }
    };

    let ids = plan_invitations(added_id, &roster);
    if ids.is_empty() {
        tracing::info!(
            "Invitation for participant {} deferred until a candidate joins evaluation {}",
            added_id,
            evaluation_id
        );
    }
    notify_many(pool, mailer, config, &evaluation, &roster, &ids, MailKind::Invitation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::EvaluatorType;

    fn p(id: i64, role: ParticipantRole, mailed: bool) -> ParticipantWithUser {
        ParticipantWithUser {
            id,
            evaluation_id: 1,
            user_id: id,
            participant_role: role,
            evaluator_type: (role == ParticipantRole::Evaluator).then_some(EvaluatorType::Peer),
            completed_at: None,
            mail_sent_at: mailed.then(Utc::now),
            reminder_sent_at: None,
            name: format!("P{}", id),
            email: format!("p{}@example.com", id),
            phone: None,
            post: None,
            is_first_login: true,
        }
    }

    #[test]
    fn candidate_alone_invites_only_itself() {
        let roster = vec![p(1, ParticipantRole::Candidat, false)];
        assert_eq!(plan_invitations(1, &roster), vec![1]);
    }

    #[test]
    fn evaluator_without_candidate_is_deferred() {
        let roster = vec![p(1, ParticipantRole::Evaluator, false)];
        assert!(plan_invitations(1, &roster).is_empty());
    }

    #[test]
    fn late_candidate_releases_deferred_evaluators() {
        let roster = vec![
            p(1, ParticipantRole::Evaluator, false),
            p(2, ParticipantRole::Evaluator, true),
            p(3, ParticipantRole::Candidat, false),
        ];
        assert_eq!(plan_invitations(3, &roster), vec![3, 1]);
    }

    #[test]
    fn evaluator_with_candidate_is_invited_now() {
        let roster = vec![
            p(1, ParticipantRole::Candidat, true),
            p(2, ParticipantRole::Evaluator, false),
        ];
        assert_eq!(plan_invitations(2, &roster), vec![2]);
        assert_eq!(candidate_name(&roster), Some("P1"));
    }

    #[test]
    fn unknown_participant_plans_nothing() {
        assert!(plan_invitations(9, &[]).is_empty());
    }
}
