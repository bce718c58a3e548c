//! # Lead Intake Telegram Bot
//!
//! A Telegram bot that runs a short intake conversation through an
//! OpenAI-compatible chat model, collects a client's name, service of
//! interest, preferred time and phone number, and stores the lead in SQLite.

pub mod bot;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod llm;
pub mod localization;
pub mod registry;
pub mod session;
