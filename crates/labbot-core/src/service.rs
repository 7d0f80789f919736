//! Entry point shared by the HTTP API and the Telegram adapter.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, Reply},
    pipeline::{Graph, GraphInput},
    utils::truncate_text,
    Result,
};

pub const FALLBACK_REPLY: &str = "Ops! Tive um problema, gostaria que eu tentasse novamente?";
pub const RESET_REPLY: &str = "Conversa reiniciada!";

const MAX_INPUT_CHARS: usize = 500;
const RESET_KEYWORDS: [&str; 3] = ["reset", "reiniciar", "restart"];
const SUSPICIOUS_TERMS: [&str; 1] = ["prompt"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputWarning {
    Empty,
    TooLong,
    ResetKeyword,
    SuspiciousTerm,
}

/// Flags odd input. Nothing here rejects a message.
pub fn validate_input(chat_input: &str) -> Vec<InputWarning> {
    let mut warnings = Vec::new();
    let lowered = chat_input.trim().to_lowercase();

    if lowered.is_empty() {
        warn!("chat input is empty or whitespace");
        warnings.push(InputWarning::Empty);
    }
    if chat_input.chars().count() > MAX_INPUT_CHARS {
        warn!(max = MAX_INPUT_CHARS, "chat input exceeds maximum length");
        warnings.push(InputWarning::TooLong);
    }
    if RESET_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        warn!("chat input mentions a reset command");
        warnings.push(InputWarning::ResetKeyword);
    }
    if SUSPICIOUS_TERMS.iter().any(|t| lowered.contains(t)) {
        warn!("chat input contains a suspicious term");
        warnings.push(InputWarning::SuspiciousTerm);
    }
    warnings
}

#[derive(Clone)]
pub struct ConversationService {
    graph: Arc<Graph>,
}

impl ConversationService {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Always returns at least one reply.
    pub async fn respond(&self, input: GraphInput) -> Vec<Reply> {
        let chat_id = input.chat_id;
        info!(
            chat_id = chat_id.0,
            input = %truncate_text(&input.chat_input, 200),
            "invoking response graph"
        );
        validate_input(&input.chat_input);

        let replies = match self.graph.invoke(input).await {
            Ok(state) => state.formatted_output,
            Err(e) => {
                error!(chat_id = chat_id.0, error = %e, "response graph failed");
                Vec::new()
            }
        };

        if replies.is_empty() {
            return vec![Reply::text(FALLBACK_REPLY)];
        }
        info!(chat_id = chat_id.0, replies = replies.len(), "agent replied");
        replies
    }

    pub async fn reset(&self, chat_id: ChatId) -> Result<Vec<Reply>> {
        info!(chat_id = chat_id.0, "resetting conversation memory");
        self.graph.reset(chat_id).await?;
        Ok(vec![Reply::text(RESET_REPLY)])
    }
}
