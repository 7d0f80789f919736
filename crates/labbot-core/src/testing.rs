//! Hand-written fakes shared by unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    errors::Error,
    model::{ChatMessage, ChatModel, ChatRequest, ChatResponse, ToolCall},
    Result,
};

/// Replays canned assistant messages and records every request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ChatMessage>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ChatMessage>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(ChatMessage::assistant(*t))).collect())
    }
}

pub fn tool_call_message(calls: &[(&str, &str, &str)]) -> ChatMessage {
    let mut msg = ChatMessage::assistant("");
    msg.tool_calls = calls
        .iter()
        .map(|(id, name, args)| ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        })
        .collect();
    msg
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().await.push(req);
        let next = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::External("script exhausted".into())));
        next.map(|message| ChatResponse {
            message,
            usage: None,
        })
    }
}
