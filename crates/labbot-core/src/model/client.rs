use async_trait::async_trait;

use crate::Result;

use super::types::{ChatRequest, ChatResponse};

/// Chat completion port. One call, one assistant message (possibly with tool calls).
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;
}
