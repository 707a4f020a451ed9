//! API client module for the Relay backend

pub mod chat;
pub mod client;

pub use chat::{read_history, send_message};
