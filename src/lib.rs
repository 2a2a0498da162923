// Public API for integration tests and potential library usage

pub mod ack;
pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod types;
pub mod ws;
