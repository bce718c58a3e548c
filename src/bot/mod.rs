//! Bot module for handling Telegram interactions
//!
//! - `message_handler`: Handles incoming Telegram messages
//! - `dialogue_manager`: Runs intake turns against the session registry

pub mod dialogue_manager;
pub mod message_handler;

// Re-export main handler function for use in main.rs
pub use message_handler::message_handler;

pub use dialogue_manager::{converse, reply_text};
