// src/handlers/question.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    models::quiz::{
        CreateQuestionRequest, OPTION_COLUMNS, OptionInput, QUESTION_COLUMNS, Question,
        QuestionOption, QuestionWithOptions, UpdateQuestionRequest, normalize_subcategory,
    },
};

const DEFAULT_CATEGORY: &str = "SUMMIT";

async fn insert_options(
    conn: &mut PgConnection,
    question_id: i64,
    options: &[OptionInput],
) -> Result<Vec<QuestionOption>, sqlx::Error> {
    if options.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO question_options (question_id, text, value, is_key) ");
    builder.push_values(options, |mut b, option| {
        b.push_bind(question_id)
            .push_bind(option.text.trim().to_string())
            .push_bind(option.value)
            .push_bind(option.is_key);
    });
    builder.push(" RETURNING ");
    builder.push(OPTION_COLUMNS);

    builder
        .build_query_as::<QuestionOption>()
        .fetch_all(&mut *conn)
        .await
}

/// Inserts one question and its options on an open connection or transaction.
/// Without an explicit order the question goes after the last one of the quiz.
pub(crate) async fn insert_question(
    conn: &mut PgConnection,
    quiz_id: i64,
    req: CreateQuestionRequest,
) -> Result<QuestionWithOptions, sqlx::Error> {
    let order = match req.order {
        Some(order) => order,
        None => {
            sqlx::query_scalar::<_, i32>(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM questions WHERE quiz_id = $1",
            )
            .bind(quiz_id)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    let category = req
        .category
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    let subcategory = normalize_subcategory(&category, req.subcategory);

    let question = sqlx::query_as::<_, Question>(&format!(
        r#"
        INSERT INTO questions (quiz_id, text, type, category, subcategory, sort_order, weight, language)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        QUESTION_COLUMNS
    ))
    .bind(quiz_id)
    .bind(req.text.trim())
    .bind(req.question_type)
    .bind(&category)
    .bind(subcategory)
    .bind(order)
    .bind(req.weight.unwrap_or(1.0))
    .bind(req.language.unwrap_or_else(|| "fr".to_string()))
    .fetch_one(&mut *conn)
    .await?;

    let options = insert_options(conn, question.id, &req.options).await?;

    Ok(QuestionWithOptions { question, options })
}

async fn ensure_quiz_exists(pool: &PgPool, quiz_id: i64) -> Result<(), AppError> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT id FROM quizzes WHERE id = $1 AND deleted_at IS NULL")
            .bind(quiz_id)
            .fetch_optional(pool)
            .await?;
    exists
        .map(|_| ())
        .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

/// Lists the questions of a quiz in display order.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_quiz_exists(&pool, quiz_id).await?;

    let questions = QuestionWithOptions::fetch_for_quiz(&pool, quiz_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch questions of quiz {}: {:?}", quiz_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(questions))
}

/// Adds a question (with options) to a quiz.
/// Admin only.
pub async fn create_question(
    State(pool): State<PgPool>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    ensure_quiz_exists(&pool, quiz_id).await?;

    let mut tx = pool.begin().await?;
    let created = insert_question(&mut tx, quiz_id, payload).await.map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Updates a question. A present `options` list replaces every existing option.
/// Admin only.
pub async fn update_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE id = $1 FOR UPDATE",
        QUESTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Question not found".to_string()))?;

    let category = payload
        .category
        .map(|c| c.trim().to_uppercase())
        .unwrap_or(current.category);
    let subcategory = normalize_subcategory(&category, payload.subcategory.or(current.subcategory));

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE questions SET ");
    let mut separated = builder.separated(", ");

    separated.push("category = ");
    separated.push_bind_unseparated(category);
    separated.push("subcategory = ");
    separated.push_bind_unseparated(subcategory);

    if let Some(text) = payload.text {
        separated.push("text = ");
        separated.push_bind_unseparated(text.trim().to_string());
    }

    if let Some(question_type) = payload.question_type {
        separated.push("type = ");
        separated.push_bind_unseparated(question_type);
    }

    if let Some(order) = payload.order {
        separated.push("sort_order = ");
        separated.push_bind_unseparated(order);
    }

    if let Some(weight) = payload.weight {
        separated.push("weight = ");
        separated.push_bind_unseparated(weight);
    }

    if let Some(language) = payload.language {
        separated.push("language = ");
        separated.push_bind_unseparated(language);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" RETURNING ");
    builder.push(QUESTION_COLUMNS);

    let question = builder
        .build_query_as::<Question>()
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question {}: {:?}", id, e);
            AppError::InternalServerError(e.to_string())
        })?;

    let options = match payload.options {
        Some(options) => {
            sqlx::query("DELETE FROM question_options WHERE question_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            insert_options(&mut tx, id, &options).await?
        }
        None => {
            sqlx::query_as::<_, QuestionOption>(&format!(
                "SELECT {} FROM question_options WHERE question_id = $1 ORDER BY id ASC",
                OPTION_COLUMNS
            ))
            .bind(id)
            .fetch_all(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;

    Ok(Json(QuestionWithOptions { question, options }))
}

/// Deletes a question; options and answers cascade.
/// Admin only.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete question: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(Json(json!({ "message": "Question deleted" })))
}
