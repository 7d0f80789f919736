//! Core domain + application logic for the laboratory assistant bot.
//!
//! This crate is framework-agnostic. Telegram, the LLM provider, Postgres and
//! the remote HTTP services live behind ports (traits) implemented in adapter
//! crates.

pub mod analytics;
pub mod charts;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod media;
pub mod memory;
pub mod messaging;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod security;
pub mod service;
pub mod tools;
pub mod utils;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
