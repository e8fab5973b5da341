// src/handlers/profile.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::users::apply_user_update,
    models::user::{MeResponse, USER_COLUMNS, UpdateProfileRequest, User},
    utils::jwt::Claims,
};

/// Get current user's profile and participation counters.
pub async fn get_me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    let (evaluations_count, completed_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(completed_at)
        FROM evaluation_participants
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(MeResponse {
        user,
        evaluations_count,
        completed_count,
    }))
}

/// Updates the caller's own profile. The role stays untouched.
pub async fn update_me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = apply_user_update(&pool, claims.user_id()?, payload.into()).await?;
    Ok(Json(user))
}
