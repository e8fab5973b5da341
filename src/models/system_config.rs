// src/models/system_config.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Minimum interval between two reminder sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "reminder_frequency", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderFrequency {
    #[serde(rename = "HOURLY_1")]
    #[sqlx(rename = "HOURLY_1")]
    Hourly1,
    #[serde(rename = "HOURLY_2")]
    #[sqlx(rename = "HOURLY_2")]
    Hourly2,
    #[default]
    #[serde(rename = "DAILY_1")]
    #[sqlx(rename = "DAILY_1")]
    Daily1,
    #[serde(rename = "DAILY_3")]
    #[sqlx(rename = "DAILY_3")]
    Daily3,
    #[serde(rename = "WEEKLY_1")]
    #[sqlx(rename = "WEEKLY_1")]
    Weekly1,
}

impl ReminderFrequency {
    pub fn interval(self) -> Duration {
        const HOUR: u64 = 3600;
        Duration::from_secs(match self {
            ReminderFrequency::Hourly1 => HOUR,
            ReminderFrequency::Hourly2 => 2 * HOUR,
            ReminderFrequency::Daily1 => 24 * HOUR,
            ReminderFrequency::Daily3 => 72 * HOUR,
            ReminderFrequency::Weekly1 => 7 * 24 * HOUR,
        })
    }
}

/// Represents the single row of the 'system_config' table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub id: i64,
    pub reminder_frequency: ReminderFrequency,
    pub reminder_enabled: bool,
    pub last_reminder_check: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub const SYSTEM_CONFIG_COLUMNS: &str =
    "id, reminder_frequency, reminder_enabled, last_reminder_check, updated_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSystemConfigRequest {
    pub reminder_frequency: Option<ReminderFrequency>,
    pub reminder_enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_wire_names() {
        let f: ReminderFrequency = serde_json::from_str("\"DAILY_3\"").unwrap();
        assert_eq!(f, ReminderFrequency::Daily3);
        assert_eq!(
            serde_json::to_string(&ReminderFrequency::Hourly2).unwrap(),
            "\"HOURLY_2\""
        );
    }

    #[test]
    fn frequency_intervals() {
        assert_eq!(ReminderFrequency::default(), ReminderFrequency::Daily1);
        assert_eq!(ReminderFrequency::Hourly2.interval(), Duration::from_secs(7200));
        assert_eq!(ReminderFrequency::Weekly1.interval(), Duration::from_secs(604_800));
    }
}
