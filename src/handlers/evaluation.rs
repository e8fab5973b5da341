// src/handlers/evaluation.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    handlers::quiz::fetch_quiz,
    models::{
        evaluation::{
            AddParticipantRequest, CreateEvaluationRequest, EVALUATION_COLUMNS, Evaluation,
            EvaluationSummary, PARTICIPANT_WITH_USER_SELECT, ParticipantRole, ParticipantWithUser,
            UpdateEvaluationRequest,
        },
        pagination::{PageQuery, Paginated},
        user::{USER_COLUMNS, User, UserRole},
    },
    services::{
        mailer::SharedMailer,
        notification::{MailKind, candidate_name, notify_after_add, notify_participant},
        report::{load_evaluation, load_participants},
    },
    utils::hash::{generate_temp_password, hash_password},
};

/// Attaches rosters and progress to a page of evaluations with a single roster query.
pub(crate) async fn summarize(
    pool: &PgPool,
    evaluations: Vec<Evaluation>,
) -> Result<Vec<EvaluationSummary>, sqlx::Error> {
    let ids: Vec<i64> = evaluations.iter().map(|e| e.id).collect();
    let participants = sqlx::query_as::<_, ParticipantWithUser>(&format!(
        "{} WHERE p.evaluation_id = ANY($1) ORDER BY p.id ASC",
        PARTICIPANT_WITH_USER_SELECT
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut rosters: HashMap<i64, Vec<ParticipantWithUser>> = HashMap::new();
    for participant in participants {
        rosters
            .entry(participant.evaluation_id)
            .or_default()
            .push(participant);
    }

    Ok(evaluations
        .into_iter()
        .map(|evaluation| {
            let roster = rosters.remove(&evaluation.id).unwrap_or_default();
            EvaluationSummary::new(evaluation, roster)
        })
        .collect())
}

async fn load_participant(pool: &PgPool, id: i64) -> Result<ParticipantWithUser, AppError> {
    sqlx::query_as::<_, ParticipantWithUser>(&format!(
        "{} WHERE p.id = $1",
        PARTICIPANT_WITH_USER_SELECT
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Participant not found".to_string()))
}

/// Creates an evaluation.
/// Admin only.
pub async fn create_evaluation(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateEvaluationRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let deadline = payload
        .deadline
        .ok_or(AppError::BadRequest("deadline is required".to_string()))?;

    if let Some(quiz_id) = payload.quiz_id {
        fetch_quiz(&pool, quiz_id).await?;
    }

    let evaluation = sqlx::query_as::<_, Evaluation>(&format!(
        r#"
        INSERT INTO evaluations (reference, quiz_id, deadline, completed_at, is_completed)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        EVALUATION_COLUMNS
    ))
    .bind(payload.reference.trim())
    .bind(payload.quiz_id)
    .bind(deadline)
    .bind(payload.completed_at)
    .bind(payload.completed_at.is_some())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create evaluation: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    tracing::info!("Evaluation {} ({}) created", evaluation.id, evaluation.reference);
    Ok((StatusCode::CREATED, Json(evaluation)))
}

/// Lists evaluations, newest first, each with roster and progress.
pub async fn list_evaluations(
    State(pool): State<PgPool>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evaluations")
        .fetch_one(&pool)
        .await?;

    let evaluations = sqlx::query_as::<_, Evaluation>(&format!(
        "SELECT {} FROM evaluations ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        EVALUATION_COLUMNS
    ))
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await?;

    let summaries = summarize(&pool, evaluations).await.map_err(|e| {
        tracing::error!("Failed to load evaluation rosters: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated::new(summaries, total, page)))
}

pub async fn get_evaluation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let evaluation = load_evaluation(&pool, id).await?;
    let roster = load_participants(&pool, id).await?;
    Ok(Json(EvaluationSummary::new(evaluation, roster)))
}

/// Partial update of an evaluation.
/// Admin only.
pub async fn update_evaluation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateEvaluationRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No field to update".to_string()));
    }

    if let Some(quiz_id) = payload.quiz_id {
        fetch_quiz(&pool, quiz_id).await?;
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE evaluations SET ");
    let mut separated = builder.separated(", ");

    if let Some(reference) = payload.reference {
        separated.push("reference = ");
        separated.push_bind_unseparated(reference.trim().to_string());
    }

    if let Some(deadline) = payload.deadline {
        separated.push("deadline = ");
        separated.push_bind_unseparated(deadline);
    }

    if let Some(completed_at) = payload.completed_at {
        separated.push("completed_at = ");
        separated.push_bind_unseparated(completed_at);
    }

    if let Some(is_completed) = payload.is_completed {
        separated.push("is_completed = ");
        separated.push_bind_unseparated(is_completed);
    }

    if let Some(quiz_id) = payload.quiz_id {
        separated.push("quiz_id = ");
        separated.push_bind_unseparated(quiz_id);
    }

    separated.push("updated_at = NOW()");

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING ");
    builder.push(EVALUATION_COLUMNS);

    let evaluation = builder
        .build_query_as::<Evaluation>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update evaluation {}: {:?}", id, e);
            AppError::InternalServerError(e.to_string())
        })?
        .ok_or(AppError::NotFound("Evaluation not found".to_string()))?;

    Ok(Json(evaluation))
}

/// Deletes an evaluation; participants and answers cascade.
/// Admin only.
pub async fn delete_evaluation(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM evaluations WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete evaluation: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Evaluation not found".to_string()));
    }

    tracing::info!("Evaluation {} deleted", id);
    Ok(Json(json!({
        "message": "Evaluation deleted",
        "deletedEvaluationId": id,
    })))
}

/// Adds a participant, creating the user account when the email is unknown,
/// then runs the invitation rules.
/// Admin only.
pub async fn add_participant(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<SharedMailer>,
    Json(payload): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let evaluation = load_evaluation(&pool, payload.evaluation_id).await?;
    let roster = load_participants(&pool, evaluation.id).await?;

    if payload.role == ParticipantRole::Candidat
        && roster
            .iter()
            .any(|p| p.participant_role == ParticipantRole::Candidat)
    {
        return Err(AppError::Conflict(
            "This evaluation already has a candidate".to_string(),
        ));
    }

    let email = payload.email.trim().to_lowercase();
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(&email)
    .fetch_optional(&mut *tx)
    .await?;

    let user = match existing {
        Some(user) => user,
        None => {
            // Placeholder credential; the invitation replaces it with a mailed one.
            let password = hash_password(&generate_temp_password())?;
            sqlx::query_as::<_, User>(&format!(
                r#"
                INSERT INTO users (name, email, phone, post, password, role)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {}
                "#,
                USER_COLUMNS
            ))
            .bind(payload.name.trim())
            .bind(&email)
            .bind(payload.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
            .bind(&payload.post)
            .bind(password)
            .bind(UserRole::from(payload.role))
            .fetch_one(&mut *tx)
            .await?
        }
    };

    if roster.iter().any(|p| p.user_id == user.id) {
        return Err(AppError::Conflict(format!(
            "{} is already a participant of this evaluation",
            email
        )));
    }

    let evaluator_type = match payload.role {
        ParticipantRole::Evaluator => payload.evaluator_type,
        ParticipantRole::Candidat => None,
    };

    let participant_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO evaluation_participants (evaluation_id, user_id, participant_role, evaluator_type)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(evaluation.id)
    .bind(user.id)
    .bind(payload.role)
    .bind(evaluator_type)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "User {} joined evaluation {} as {:?}",
        user.id,
        evaluation.id,
        payload.role
    );

    let notifications = notify_after_add(&pool, &mailer, &config, evaluation.id, participant_id).await;
    let participant = load_participant(&pool, participant_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": user,
            "participant": participant,
            "notifications": notifications,
        })),
    ))
}

pub async fn list_participants(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    load_evaluation(&pool, id).await?;
    let roster = load_participants(&pool, id).await?;
    Ok(Json(roster))
}

pub async fn list_evaluators(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    load_evaluation(&pool, id).await?;
    let evaluators: Vec<ParticipantWithUser> = load_participants(&pool, id)
        .await?
        .into_iter()
        .filter(|p| p.participant_role == ParticipantRole::Evaluator)
        .collect();
    Ok(Json(evaluators))
}

/// Removes a participant and its answers.
/// Admin only.
pub async fn delete_participant(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant = load_participant(&pool, id).await?;

    sqlx::query("DELETE FROM evaluation_participants WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    tracing::info!(
        "Participant {} removed from evaluation {}",
        id,
        participant.evaluation_id
    );
    Ok(Json(participant))
}

async fn send_manual(
    pool: &PgPool,
    mailer: &SharedMailer,
    config: &Config,
    participant_id: i64,
    kind: MailKind,
) -> Result<ParticipantWithUser, AppError> {
    let participant = load_participant(pool, participant_id).await?;

    if kind == MailKind::Reminder && participant.mail_sent_at.is_none() {
        return Err(AppError::BadRequest(
            "The participant has not been invited yet".to_string(),
        ));
    }

    let evaluation = load_evaluation(pool, participant.evaluation_id).await?;
    let roster = load_participants(pool, evaluation.id).await?;

    notify_participant(
        pool,
        mailer,
        config,
        &evaluation,
        &participant,
        candidate_name(&roster),
        kind,
    )
    .await
    .map_err(|e| {
        tracing::error!("{:?} to participant {} failed: {}", kind, participant_id, e);
        AppError::InternalServerError(format!("Failed to send mail: {}", e))
    })?;

    load_participant(pool, participant_id).await
}

/// Sends (or re-sends) the invitation of one participant.
/// Admin only.
pub async fn send_participant_mail(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<SharedMailer>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant = send_manual(&pool, &mailer, &config, id, MailKind::Invitation).await?;
    Ok(Json(json!({ "ok": true, "participant": participant })))
}

/// Sends a reminder to one already-invited participant.
/// Admin only.
pub async fn send_participant_reminder(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<SharedMailer>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant = send_manual(&pool, &mailer, &config, id, MailKind::Reminder).await?;
    Ok(Json(json!({ "ok": true, "participant": participant })))
}
