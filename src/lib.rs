pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod curricula;
pub mod db;
pub mod email;
pub mod errors;
pub mod password_reset;
pub mod repository;
pub mod short_links;
pub mod state;
