pub mod admin_api;
pub mod admin_stats;
pub mod api_client;
pub mod auth_service;
pub mod chat_api;
pub mod chat_controller;
pub mod chat_state;
pub mod config_service;
pub mod content_service;
pub mod file_api;
pub mod file_service;
pub mod realtime;
