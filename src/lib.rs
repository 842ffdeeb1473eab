pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod metrics;
pub mod provider;
pub mod rate_limit;
pub mod rating;
