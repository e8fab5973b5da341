// src/handlers/quiz.rs

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
    error::AppError,
    handlers::question::insert_question,
    models::{
        pagination::{PageQuery, Paginated},
        quiz::{
            CreateQuizRequest, QUIZ_COLUMNS, QuestionWithOptions, Quiz, QuizListItem,
            QuizWithQuestions, UpdateQuizRequest,
        },
    },
};

pub(crate) async fn fetch_quiz(pool: &PgPool, id: i64) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(&format!(
        "SELECT {} FROM quizzes WHERE id = $1 AND deleted_at IS NULL",
        QUIZ_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

/// Lists quizzes that were not soft-deleted.
pub async fn list_quizzes(
    State(pool): State<PgPool>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quizzes WHERE deleted_at IS NULL")
        .fetch_one(&pool)
        .await?;

    let quizzes = sqlx::query_as::<_, QuizListItem>(
        r#"
        SELECT q.id, q.title, q.description, q.is_active, q.created_at, q.updated_at, q.deleted_at,
               (SELECT COUNT(*) FROM questions qs WHERE qs.quiz_id = q.id) AS questions_count
        FROM quizzes q
        WHERE q.deleted_at IS NULL
        ORDER BY q.created_at DESC, q.id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list quizzes: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated::new(quizzes, total, page)))
}

/// Returns a quiz with its ordered questions and their options.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = fetch_quiz(&pool, id).await?;
    let questions = QuestionWithOptions::fetch_for_quiz(&pool, id).await?;

    Ok(Json(QuizWithQuestions { quiz, questions }))
}

/// Creates a quiz and, in the same transaction, its nested questions.
/// Admin only.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let quiz = sqlx::query_as::<_, Quiz>(&format!(
        "INSERT INTO quizzes (title, description, is_active) VALUES ($1, $2, $3) RETURNING {}",
        QUIZ_COLUMNS
    ))
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(payload.is_active.unwrap_or(true))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create quiz: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let mut questions = Vec::with_capacity(payload.questions.len());
    for (index, mut question) in payload.questions.into_iter().enumerate() {
        question.order.get_or_insert(index as i32);
        questions.push(insert_question(&mut tx, quiz.id, question).await?);
    }

    tx.commit().await?;

    tracing::info!("Quiz {} created with {} question(s)", quiz.id, questions.len());
    Ok((StatusCode::CREATED, Json(QuizWithQuestions { quiz, questions })))
}

/// Updates quiz metadata.
/// Admin only.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE quizzes SET ");
    let mut separated = builder.separated(", ");

    if let Some(title) = payload.title {
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
    }

    if let Some(description) = payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(description);
    }

    if let Some(is_active) = payload.is_active {
        separated.push("is_active = ");
        separated.push_bind_unseparated(is_active);
    }

    separated.push("updated_at = NOW()");

    builder.push(" WHERE deleted_at IS NULL AND id = ");
    builder.push_bind(id);
    builder.push(" RETURNING ");
    builder.push(QUIZ_COLUMNS);

    let quiz = builder
        .build_query_as::<Quiz>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update quiz: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    Ok(Json(quiz))
}

/// Soft-deletes a quiz. Evaluations keep their reference to it.
/// Admin only.
pub async fn delete_quiz(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "UPDATE quizzes SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    Ok(Json(json!({ "message": "Quiz deleted" })))
}
