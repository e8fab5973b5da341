pub mod answer;
pub mod evaluation;
pub mod pagination;
pub mod quiz;
pub mod system_config;
pub mod user;
