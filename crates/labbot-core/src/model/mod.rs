//! Provider-agnostic chat model types and port.

pub mod client;
pub mod types;

pub use client::ChatModel;
pub use types::*;
