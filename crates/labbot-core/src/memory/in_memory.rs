use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    memory::{Checkpointer, ThreadState},
    Result,
};

/// Process-local checkpointer; state is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<HashMap<String, ThreadState>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn open(&self) -> Result<()> {
        info!("opening in-memory checkpointer");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("closing in-memory checkpointer");
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()> {
        self.threads
            .write()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn reset_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.remove(thread_id);
        info!(thread_id, "thread reset");
        Ok(())
    }
}
