//! Per-thread conversation persistence.

pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{model::ChatMessage, Result};

pub use in_memory::InMemoryCheckpointer;

/// What survives between turns of one conversation thread.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub messages_history: Vec<ChatMessage>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Storage strategy for conversation state, keyed by thread id (the chat id).
#[async_trait]
pub trait Checkpointer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepares the backing store (connections, migrations).
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>>;

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()>;

    /// Forgets everything stored for the thread.
    async fn reset_thread(&self, thread_id: &str) -> Result<()>;
}
