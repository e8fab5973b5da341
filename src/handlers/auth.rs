// src/handlers/auth.rs

use std::path::Path;

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::{Config, RESET_TOKEN_TTL_MINUTES},
    error::AppError,
    models::user::{
        LoginRequest, PasswordResetConfirm, PasswordResetRequest, RefreshRequest, SignupForm,
        USER_COLUMNS, UploadedFile, User, UserRole,
    },
    services::{emails, mailer::SharedMailer},
    utils::{
        hash::{generate_reset_token, hash_password, verify_password},
        jwt::{TokenPair, issue_token_pair, verify_jwt},
    },
};

/// Body returned by signup and login: the user next to the flattened token pair.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
    #[serde(skip_serializing_if = "Option::is_none")]
    was_first_login: Option<bool>,
}

/// Reads the multipart signup body into a typed form. Text parts are trimmed and
/// empty ones treated as absent; the `avatar` part keeps its raw bytes.
async fn read_signup_form(mut multipart: Multipart) -> Result<SignupForm, AppError> {
    let mut form = SignupForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "avatar" {
            let file_name = field.file_name().unwrap_or("avatar").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read avatar: {}", e)))?;
            if !bytes.is_empty() {
                form.avatar = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read field '{}': {}", name, e)))?;
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }

        match name.as_str() {
            "name" => form.name = value,
            "email" => form.email = value.to_lowercase(),
            "phone" => form.phone = value,
            "post" => form.post = Some(value),
            "password" => form.password = value,
            "role" => {
                form.role = Some(
                    serde_json::from_value(json!(value.to_uppercase()))
                        .map_err(|_| AppError::BadRequest(format!("Unknown role '{}'", value)))?,
                )
            }
            other => tracing::debug!("Ignoring signup field '{}'", other),
        }
    }

    Ok(form)
}

/// Writes the avatar under `<upload_dir>/avatars` with a random name, keeping the extension.
async fn store_avatar(upload_dir: &str, avatar: &UploadedFile) -> Result<String, AppError> {
    let ext = Path::new(&avatar.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    let file_name = format!("{}{}", uuid::Uuid::new_v4(), ext);

    let dir = Path::new(upload_dir).join("avatars");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    tokio::fs::write(dir.join(&file_name), &avatar.bytes)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    tracing::info!("Avatar stored: {}", file_name);
    Ok(format!("/uploads/avatars/{}", file_name))
}

async fn store_refresh_token(
    pool: &PgPool,
    user_id: i64,
    tokens: &TokenPair,
    config: &Config,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&tokens.refresh_token)
        .bind(user_id)
        .bind(Utc::now() + Duration::seconds(config.jwt_refresh_expiration as i64))
        .execute(pool)
        .await?;
    Ok(())
}

/// Registers a new user from a multipart form (optional `avatar` file).
///
/// Returns 201 with the user and a token pair.
pub async fn signup(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_signup_form(multipart).await?;
    form.validate()?;

    if form.role == Some(UserRole::Admin) {
        return Err(AppError::Forbidden(
            "The ADMIN role cannot be self-assigned".to_string(),
        ));
    }

    let taken: Option<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE email = $1 OR phone = $2 LIMIT 1")
            .bind(&form.email)
            .bind(&form.phone)
            .fetch_optional(&pool)
            .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(
            "Email or phone already in use".to_string(),
        ));
    }

    let avatar = match &form.avatar {
        Some(file) => Some(store_avatar(&config.upload_dir, file).await?),
        None => None,
    };

    let hashed_password = hash_password(&form.password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (name, email, phone, post, password, role, avatar, is_first_login)
        VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(&form.name)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.post)
    .bind(hashed_password)
    .bind(form.role.unwrap_or(UserRole::Candidat))
    .bind(avatar)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if crate::error::is_unique_violation(&e) {
            AppError::Conflict("Email or phone already in use".to_string())
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    let tokens = issue_token_pair(user.id, user.role, &config)?;
    store_refresh_token(&pool, user.id, &tokens, &config).await?;

    tracing::info!("User {} registered", user.id);
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user,
            tokens,
            was_first_login: None,
        }),
    ))
}

/// Authenticates by email and password.
///
/// Clears the first-login flag and persists the refresh token.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::AuthError("Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password) {
        return Err(AppError::AuthError("Invalid credentials".to_string()));
    }

    let was_first_login = user.is_first_login;
    if was_first_login {
        sqlx::query("UPDATE users SET is_first_login = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await?;
    }

    let tokens = issue_token_pair(user.id, user.role, &config)?;
    store_refresh_token(&pool, user.id, &tokens, &config).await?;

    Ok(Json(AuthResponse {
        user: User {
            is_first_login: false,
            ..user
        },
        tokens,
        was_first_login: Some(was_first_login),
    }))
}

/// Exchanges a stored, unexpired refresh token for a new pair. The old token is consumed.
pub async fn refresh(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = verify_jwt(&payload.refresh_token, &config.jwt_refresh_secret)?;
    let user_id = claims.user_id()?;

    let deleted = sqlx::query(
        "DELETE FROM refresh_tokens WHERE token = $1 AND user_id = $2 AND expires_at > NOW()",
    )
    .bind(&payload.refresh_token)
    .bind(user_id)
    .execute(&pool)
    .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::AuthError("Refresh token revoked or expired".to_string()));
    }

    let role: UserRole =
        sqlx::query_scalar("SELECT role FROM users WHERE id = $1 AND deleted_at IS NULL")
            .bind(user_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::AuthError("User not found".to_string()))?;

    let tokens = issue_token_pair(user_id, role, &config)?;
    store_refresh_token(&pool, user_id, &tokens, &config).await?;
    Ok(Json(tokens))
}

/// Revokes the given refresh token. Unknown tokens are not an error.
pub async fn logout(
    State(pool): State<PgPool>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
        .bind(&payload.refresh_token)
        .execute(&pool)
        .await?;
    Ok(Json(json!({ "message": "Logged out" })))
}

/// Starts a password reset. The answer is the same whether or not the email exists.
pub async fn request_password_reset(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<SharedMailer>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&pool)
    .await?;

    if let Some(user) = user {
        let token = generate_reset_token();
        sqlx::query(
            "INSERT INTO password_reset_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&token)
        .bind(user.id)
        .bind(Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES))
        .execute(&pool)
        .await?;

        let mail = emails::password_reset(&user.name, &user.email, &token, &config.frontend_url);
        if let Err(e) = mailer.send(mail).await {
            tracing::error!("Failed to send reset mail to user {}: {}", user.id, e);
        }
    } else {
        tracing::info!("Password reset requested for unknown email");
    }

    Ok(Json(json!({
        "message": "If this email exists, a reset link has been sent"
    })))
}

/// Completes a password reset: the token must be unused and not expired.
/// Every refresh token of the user is revoked.
pub async fn reset_password(
    State(pool): State<PgPool>,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let user_id: i64 = sqlx::query_scalar(
        r#"
        UPDATE password_reset_tokens SET used = TRUE
        WHERE token = $1 AND used = FALSE AND expires_at > NOW()
        RETURNING user_id
        "#,
    )
    .bind(&payload.token)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::BadRequest("Invalid or expired token".to_string()))?;

    let hashed = hash_password(&payload.new_password)?;
    sqlx::query(
        "UPDATE users SET password = $1, is_first_login = FALSE, updated_at = NOW() WHERE id = $2",
    )
    .bind(hashed)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Password reset for user {}", user_id);
    Ok(Json(json!({ "message": "Password updated" })))
}
