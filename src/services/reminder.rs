// src/services/reminder.rs

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::Config,
    error::AppError,
    models::system_config::{ReminderFrequency, SYSTEM_CONFIG_COLUMNS, SystemConfig},
    services::{
        mailer::SharedMailer,
        notification::{MailKind, notify_many},
        report::{load_evaluation, load_participants},
    },
};

/// Whether a scheduled sweep should run now.
pub fn sweep_due(
    enabled: bool,
    frequency: ReminderFrequency,
    last_check: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if !enabled {
        return false;
    }
    match last_check {
        None => true,
        Some(last) => match (now - last).to_std() {
            Ok(elapsed) => elapsed >= frequency.interval(),
            // Clock went backwards; wait for it to catch up.
            Err(_) => false,
        },
    }
}

/// Reads the single configuration row, inserting the defaults when the table is empty.
pub async fn load_system_config(pool: &PgPool) -> Result<SystemConfig, sqlx::Error> {
    let existing = sqlx::query_as::<_, SystemConfig>(&format!(
        "SELECT {} FROM system_config ORDER BY id ASC LIMIT 1",
        SYSTEM_CONFIG_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    match existing {
        Some(config) => Ok(config),
        None => {
            sqlx::query_as::<_, SystemConfig>(&format!(
                "INSERT INTO system_config DEFAULT VALUES RETURNING {}",
                SYSTEM_CONFIG_COLUMNS
            ))
            .fetch_one(pool)
            .await
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub ran: bool,
    pub evaluations: usize,
    pub reminded: Vec<i64>,
    pub failed: Vec<i64>,
}

#[derive(FromRow)]
struct PendingParticipant {
    participant_id: i64,
    evaluation_id: i64,
}

/// Periodic reminder sweep with an explicit start/stop lifecycle.
pub struct ReminderService {
    pool: PgPool,
    mailer: SharedMailer,
    config: Config,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ReminderService {
    pub fn new(pool: PgPool, mailer: SharedMailer, config: Config) -> Self {
        Self {
            pool,
            mailer,
            config,
            running: Mutex::new(None),
        }
    }

    /// Spawns the tick loop. Calling it twice keeps the first loop.
    pub fn start(self: &Arc<Self>) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            tracing::warn!("Reminder service already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let tick = Duration::from_secs(self.config.reminder_tick_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.run_once(false).await {
                            Ok(report) if report.ran => tracing::info!(
                                "Reminder sweep: {} evaluation(s), {} reminded, {} failed",
                                report.evaluations,
                                report.reminded.len(),
                                report.failed.len()
                            ),
                            Ok(_) => tracing::debug!("Reminder sweep not due"),
                            Err(e) => tracing::error!("Reminder sweep failed: {:?}", e),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Reminder service stopped");
        });

        *running = Some((stop_tx, handle));
        tracing::info!("Reminder service started (tick {:?})", tick);
    }

    pub async fn stop(&self) {
        let taken = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((stop_tx, handle)) = taken {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                tracing::error!("Reminder task ended abnormally: {}", e);
            }
        }
    }

    /// One sweep over evaluators still owing answers. `force` skips the enabled flag and
/// the minimum interval.
    pub async fn run_once(&self, force: bool) -> Result<SweepReport, AppError> {
        let settings = load_system_config(&self.pool).await?;
        let now = Utc::now();

        if !force
            && !sweep_due(
                settings.reminder_enabled,
                settings.reminder_frequency,
                settings.last_reminder_check,
                now,
            )
        {
            return Ok(SweepReport::default());
        }

        sqlx::query("UPDATE system_config SET last_reminder_check = $2 WHERE id = $1")
            .bind(settings.id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let pending = sqlx::query_as::<_, PendingParticipant>(
            r#"
            SELECT p.id AS participant_id, p.evaluation_id
            FROM evaluation_participants p
            JOIN evaluations e ON e.id = p.evaluation_id
            WHERE p.participant_role = 'EVALUATOR'
              AND p.mail_sent_at IS NOT NULL
              AND p.completed_at IS NULL
              AND e.is_completed = FALSE
              AND e.deadline >= $1
              AND EXISTS (
                  SELECT 1 FROM evaluation_participants c
                  WHERE c.evaluation_id = e.id AND c.participant_role = 'CANDIDAT'
              )
            ORDER BY p.evaluation_id, p.id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut by_evaluation: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for row in pending {
            by_evaluation
                .entry(row.evaluation_id)
                .or_default()
                .push(row.participant_id);
        }

        let mut report = SweepReport {
            ran: true,
            evaluations: by_evaluation.len(),
            ..Default::default()
        };

        for (evaluation_id, ids) in by_evaluation {
            let evaluation = match load_evaluation(&self.pool, evaluation_id).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    tracing::error!("Skipping evaluation {}: {:?}", evaluation_id, e);
                    report.failed.extend(ids);
                    continue;
                }
            };
            let roster = match load_participants(&self.pool, evaluation_id).await {
                Ok(roster) => roster,
                Err(e) => {
                    tracing::error!("Skipping evaluation {}: {}", evaluation_id, e);
                    report.failed.extend(ids);
                    continue;
                }
            };

            let summary = notify_many(
                &self.pool,
                &self.mailer,
                &self.config,
                &evaluation,
                &roster,
                &ids,
                MailKind::Reminder,
            )
            .await;
            report.reminded.extend(summary.sent);
            report.failed.extend(summary.failed);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn disabled_never_runs() {
        assert!(!sweep_due(false, ReminderFrequency::Hourly1, None, Utc::now()));
    }

    #[test]
    fn first_sweep_runs_immediately() {
        assert!(sweep_due(true, ReminderFrequency::Weekly1, None, Utc::now()));
    }

    #[test]
    fn interval_is_enforced() {
        let now = Utc::now();
        let last = now - ChronoDuration::minutes(90);
        assert!(sweep_due(true, ReminderFrequency::Hourly1, Some(last), now));
        assert!(!sweep_due(true, ReminderFrequency::Hourly2, Some(last), now));
        assert!(!sweep_due(true, ReminderFrequency::Daily1, Some(now + ChronoDuration::minutes(5)), now));
    }
}
