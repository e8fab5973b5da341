// src/models/user.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 .\-]{5,19}$").expect("phone regex is valid")
});

/// Account role carried in the JWT and stored on `users.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Evaluator,
    Candidat,
}

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub post: Option<String>,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub role: UserRole,
    pub avatar: Option<String>,

    /// True until the user logs in once; invitations then carry a temporary password.
    pub is_first_login: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub const USER_COLUMNS: &str = "id, name, email, phone, post, password, role, avatar, \
     is_first_login, created_at, updated_at, deleted_at";

/// Signup form after the multipart body has been normalized.
#[derive(Debug, Default, Validate)]
pub struct SignupForm {
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub name: String,
    #[validate(email(message = "Email is invalid."))]
    pub email: String,
    #[validate(custom(function = validate_phone))]
    pub phone: String,
    pub post: Option<String>,
    pub role: Option<UserRole>,
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,
    pub avatar: Option<UploadedFile>,
}

/// Raw file part lifted out of a multipart body.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password must contain at least 6 characters."
    ))]
    pub new_password: String,
}

/// DTO for Admin creating a user (can specify role).
#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = validate_phone))]
    pub phone: Option<String>,
    pub post: Option<String>,
    pub role: UserRole,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom(function = validate_phone))]
    pub phone: Option<String>,
    pub post: Option<String>,
    pub role: Option<UserRole>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.post.is_none()
            && self.role.is_none()
            && self.password.is_none()
    }
}

/// Self-service profile update. The role is never editable here.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom(function = validate_phone))]
    pub phone: Option<String>,
    pub post: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
}

impl From<UpdateProfileRequest> for UpdateUserRequest {
    fn from(p: UpdateProfileRequest) -> Self {
        Self {
            name: p.name,
            email: p.email,
            phone: p.phone,
            post: p.post,
            role: None,
            password: p.password,
        }
    }
}

/// Current user plus participation counters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: User,
    pub evaluations_count: i64,
    pub completed_count: i64,
}

fn validate_phone(phone: &str) -> Result<(), validator::ValidationError> {
    if PHONE_RE.is_match(phone.trim()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("phone_invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_phone_formats() {
        assert!(validate_phone("+33 6 12 34 56 78").is_ok());
        assert!(validate_phone("0612345678").is_ok());
        assert!(validate_phone("034-12-345-67").is_ok());
    }

    #[test]
    fn rejects_garbage_phone() {
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("12").is_err());
    }

    #[test]
    fn profile_update_never_carries_a_role() {
        let update: UpdateUserRequest = UpdateProfileRequest {
            name: Some("Ada".into()),
            email: None,
            phone: None,
            post: None,
            password: None,
        }
        .into();
        assert!(update.role.is_none());
        assert!(!update.is_empty());
    }

    #[test]
    fn signup_form_validation() {
        let form = SignupForm {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: "0612345678".into(),
            password: "secret1".into(),
            ..Default::default()
        };
        assert!(form.validate().is_ok());

        let bad = SignupForm {
            email: "not-an-email".into(),
            ..form
        };
        assert!(bad.validate().is_err());
    }
}
