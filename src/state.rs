use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{mailer::SharedMailer, reminder::ReminderService},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub mailer: SharedMailer,
    pub reminders: Arc<ReminderService>,
}

impl AppState {
    /// Wires the reminder service to the same pool, mailer and config. The
    /// service is built stopped; `main` starts it.
    pub fn new(pool: PgPool, config: Config, mailer: SharedMailer) -> Self {
        let reminders = Arc::new(ReminderService::new(
            pool.clone(),
            mailer.clone(),
            config.clone(),
        ));
        Self {
            pool,
            config,
            mailer,
            reminders,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for SharedMailer {
    fn from_ref(state: &AppState) -> Self {
        state.mailer.clone()
    }
}

impl FromRef<AppState> for Arc<ReminderService> {
    fn from_ref(state: &AppState) -> Self {
        state.reminders.clone()
    }
}
