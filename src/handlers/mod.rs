// src/handlers/mod.rs

pub mod auth;
pub mod candidate;
pub mod evaluation;
pub mod profile;
pub mod question;
pub mod quiz;
pub mod report;
pub mod system_config;
pub mod users;
