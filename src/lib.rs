pub mod auth;
pub mod config;
pub mod database;
pub mod handlers;
pub mod media;
pub mod models;
pub mod realtime;
pub mod schema;
pub mod snaps;
pub mod state;
