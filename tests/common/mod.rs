// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backend::{
    config::Config,
    models::user::UserRole,
    routes,
    services::{
        mailer::{MailError, Mailer, OutgoingMail},
        reminder::ReminderService,
    },
    state::AppState,
    utils::{hash::hash_password, jwt::sign_jwt},
};
use sqlx::{PgPool, postgres::PgPoolOptions};

pub const JWT_SECRET: &str = "test_secret_for_integration_tests";

pub fn test_config(database_url: &str) -> Config {
    Config {
        database_url: database_url.to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        jwt_refresh_secret: "test_refresh_secret".to_string(),
        jwt_refresh_expiration: 3600,
        rust_log: "error".to_string(),
        app_env: "test".to_string(),
        port: 0,
        frontend_url: "http://localhost:5173/".to_string(),
        upload_dir: std::env::temp_dir()
            .join("evaluation-backend-tests")
            .to_string_lossy()
            .into_owned(),
        smtp: None,
        reminder_tick_seconds: 3600,
        admin_email: None,
        admin_password: None,
    }
}

pub fn token_for(id: i64, role: UserRole) -> String {
    sign_jwt(id, role, JWT_SECRET, 600).unwrap()
}

/// Keeps every mail instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }

    pub fn count_to(&self, email: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| m.to == email).count()
    }

    /// Mails to `email` whose subject starts with `prefix`.
    pub fn count_subject(&self, email: &str, prefix: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == email && m.subject.starts_with(prefix))
            .count()
    }

    pub fn last_to(&self, email: &str) -> Option<OutgoingMail> {
        self.sent.lock().unwrap().iter().rev().find(|m| m.to == email).cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub pool: PgPool,
    pub mailer: Arc<RecordingMailer>,
    pub reminders: Arc<ReminderService>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Inserts a user with a known password and returns its id and an access token.
    pub async fn create_user(&self, role: UserRole, password: &str) -> (i64, String, String) {
        let email = format!("{}@example.com", uuid::Uuid::new_v4());
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (name, email, password, role, is_first_login) \
             VALUES ($1, $2, $3, $4, FALSE) RETURNING id",
        )
        .bind(format!("User {}", &email[..8]))
        .bind(&email)
        .bind(hash_password(password).unwrap())
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .unwrap();
        (id, email, token_for(id, role))
    }

    pub async fn set_password(&self, email: &str, password: &str) -> (i64, UserRole) {
        sqlx::query_as("UPDATE users SET password = $1 WHERE email = $2 RETURNING id, role")
            .bind(hash_password(password).unwrap())
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

/// Spawns the app on a random port against `DATABASE_URL`. Returns `None` when the
/// variable is unset so database tests skip instead of failing.
pub async fn spawn_app() -> Option<TestApp> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(pool.clone(), test_config(&database_url), mailer.clone());
    // Never started: tests drive sweeps through `run_once`.
    let reminders = state.reminders.clone();
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp {
        address: format!("http://127.0.0.1:{}", port),
        pool,
        mailer,
        reminders,
        client: reqwest::Client::new(),
    })
}
