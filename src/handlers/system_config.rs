// src/handlers/system_config.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::system_config::{SYSTEM_CONFIG_COLUMNS, SystemConfig, UpdateSystemConfigRequest},
    services::reminder::{ReminderService, load_system_config},
};

/// Current reminder settings.
/// Admin only.
pub async fn get_config(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let config = load_system_config(&pool).await?;
    Ok(Json(config))
}

/// Admin only.
pub async fn update_config(
    State(pool): State<PgPool>,
    Json(payload): Json<UpdateSystemConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current = load_system_config(&pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE system_config SET ");
    let mut separated = builder.separated(", ");

    if let Some(frequency) = payload.reminder_frequency {
        separated.push("reminder_frequency = ");
        separated.push_bind_unseparated(frequency);
    }

    if let Some(enabled) = payload.reminder_enabled {
        separated.push("reminder_enabled = ");
        separated.push_bind_unseparated(enabled);
    }

    separated.push("updated_at = NOW()");

    builder.push(" WHERE id = ");
    builder.push_bind(current.id);
    builder.push(" RETURNING ");
    builder.push(SYSTEM_CONFIG_COLUMNS);

    let updated = builder
        .build_query_as::<SystemConfig>()
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update system config: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    tracing::info!(
        "Reminder settings: {:?}, enabled = {}",
        updated.reminder_frequency,
        updated.reminder_enabled
    );
    Ok(Json(updated))
}

/// Runs a reminder sweep now, ignoring the enabled flag and the interval.
/// Admin only.
pub async fn run_reminders(
    State(reminders): State<Arc<ReminderService>>,
) -> Result<impl IntoResponse, AppError> {
    let report = reminders.run_once(true).await?;
    Ok(Json(report))
}
