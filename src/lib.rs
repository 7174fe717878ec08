pub mod audit;
pub mod auth;
pub mod error;
pub mod export;
pub mod models;
pub mod moderation;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod security;
pub mod settings;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
