// src/services/mod.rs

pub mod emails;
pub mod mailer;
pub mod notification;
pub mod pdf;
pub mod reminder;
pub mod report;
pub mod submission;
