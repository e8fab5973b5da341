// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Default page size for paginated listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;
/// Hard ceiling on `limit` query parameters.
pub const MAX_PAGE_LIMIT: i64 = 100;
/// Questions per page on the candidate questionnaire.
pub const QUESTIONS_PER_PAGE: i64 = 5;
/// Length of generated temporary passwords.
pub const TEMP_PASSWORD_LENGTH: usize = 12;
/// Password reset links expire after one hour.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;
/// Multipart uploads (avatars) are capped at 50 MB.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
/// Category pushed to the end of the candidate questionnaire.
pub const TRAILING_CATEGORY: &str = "AUTRE";
/// Only this category keeps a subcategory.
pub const SUBCATEGORY_PARENT: &str = "PINNACLE";

/// SMTP connection settings. Present only when host, user and password are all set.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub jwt_refresh_secret: String,
    pub jwt_refresh_expiration: u64,
    pub rust_log: String,
    /// `production` hides internal error details from API responses.
    pub app_env: String,
    pub port: u16,
    pub frontend_url: String,
    pub upload_dir: String,
    pub smtp: Option<SmtpConfig>,
    pub reminder_tick_seconds: u64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_refresh_secret = env::var("JWT_REFRESH_SECRET")
            .expect("JWT_REFRESH_SECRET must be set");

        let jwt_expiration = parse_or("JWT_EXPIRATION", 3600);
        let jwt_refresh_expiration = parse_or("JWT_REFRESH_EXPIRATION", 7 * 24 * 3600);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let app_env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string());

        let frontend_url = env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:5173/".to_string());

        let upload_dir = env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| "public".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            jwt_refresh_secret,
            jwt_refresh_expiration,
            rust_log,
            app_env,
            port: parse_or("PORT", 3000),
            frontend_url,
            upload_dir,
            smtp: smtp_from_env(),
            reminder_tick_seconds: parse_or("REMINDER_TICK_SECONDS", 5 * 60),
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn smtp_from_env() -> Option<SmtpConfig> {
    let host = env::var("SMTP_HOST").ok();
    let user = env::var("SMTP_USER").ok();
    let pass = env::var("SMTP_PASS").ok();

    match (host, user, pass) {
        (Some(host), Some(user), Some(pass)) => {
            let from = env::var("SMTP_FROM").unwrap_or_else(|_| user.clone());
            Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 587),
                user,
                pass,
                from,
            })
        }
        _ => None,
    }
}
