// src/handlers/users.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    models::{
        pagination::{PageQuery, Paginated},
        user::{AdminCreateUserRequest, USER_COLUMNS, UpdateUserRequest, User},
    },
    utils::{hash::hash_password, jwt::Claims},
};

/// Lists users that were not soft-deleted, newest first.
/// Admin only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
        .fetch_one(&pool)
        .await?;

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE deleted_at IS NULL ORDER BY id DESC LIMIT $1 OFFSET $2",
        USER_COLUMNS
    ))
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated::new(users, total, page)))
}

pub async fn get_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

/// Creates a user with an explicit role.
/// Admin only.
pub async fn create_user(
    State(pool): State<PgPool>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let hashed_password = hash_password(&payload.password)?;
    let email = payload.email.trim().to_lowercase();

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (name, email, phone, post, password, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(payload.name.trim())
    .bind(&email)
    .bind(payload.phone.as_deref().map(str::trim))
    .bind(&payload.post)
    .bind(hashed_password)
    .bind(payload.role)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("A user with email '{}' or this phone already exists", email))
        } else {
            tracing::error!("Failed to create user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    tracing::info!("Admin created user {} ({:?})", user.id, user.role);
    Ok((StatusCode::CREATED, Json(user)))
}

/// Applies the present fields of `payload` to user `id` and returns the stored row.
pub(crate) async fn apply_user_update(
    pool: &PgPool,
    id: i64,
    payload: UpdateUserRequest,
) -> Result<User, AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
    let mut separated = builder.separated(", ");

    if let Some(name) = payload.name {
        separated.push("name = ");
        separated.push_bind_unseparated(name.trim().to_string());
    }

    if let Some(email) = payload.email {
        separated.push("email = ");
        separated.push_bind_unseparated(email.trim().to_lowercase());
    }

    if let Some(phone) = payload.phone {
        separated.push("phone = ");
        separated.push_bind_unseparated(phone.trim().to_string());
    }

    if let Some(post) = payload.post {
        separated.push("post = ");
        separated.push_bind_unseparated(post);
    }

    if let Some(role) = payload.role {
        separated.push("role = ");
        separated.push_bind_unseparated(role);
    }

    if let Some(password) = payload.password {
        separated.push("password = ");
        separated.push_bind_unseparated(hash_password(&password)?);
    }

    separated.push("updated_at = NOW()");

    builder.push(" WHERE deleted_at IS NULL AND id = ");
    builder.push_bind(id);
    builder.push(" RETURNING ");
    builder.push(USER_COLUMNS);

    builder
        .build_query_as::<User>()
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email or phone already in use".to_string())
            } else {
                tracing::error!("Failed to update user {}: {:?}", id, e);
                AppError::InternalServerError(e.to_string())
            }
        })?
        .ok_or(AppError::NotFound("User not found".to_string()))
}

/// Updates user information.
/// Admin only.
pub async fn update_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No field to update".to_string()));
    }

    let user = apply_user_update(&pool, id, payload).await?;
    Ok(Json(user))
}

/// Soft-deletes a user by ID.
/// Admin only. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id()? {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE users SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("User {} soft-deleted by {}", id, claims.sub);
    Ok(Json(json!({ "message": "User deleted" })))
}
