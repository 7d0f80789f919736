//! Response generation: input digest -> tool-calling agent -> output formatter.

pub mod agent;
pub mod formatter;
pub mod graph;
pub mod input_digest;
pub mod state;

pub use agent::MainBot;
pub use formatter::Formatter;
pub use graph::{Graph, Node};
pub use input_digest::InputDigest;
pub use state::{GraphInput, GraphState};
