pub mod app;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod repositories;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;
