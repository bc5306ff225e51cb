pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod flag_service;
pub mod logging;
pub mod models;
pub mod progress;
pub mod question_service;
pub mod quiz_service;
pub mod scoring;
pub mod stats_cache;

pub use api::{create_app, create_router, AppState};
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use flag_service::FlagService;
pub use models::*;
pub use question_service::QuestionService;
pub use quiz_service::QuizService;
pub use stats_cache::StatsCache;
