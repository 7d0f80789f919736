use async_trait::async_trait;

use crate::{
    model::ChatMessage,
    pipeline::{graph::Node, state::GraphState},
    Result,
};

/// Appends the user turn to history and cuts the working window.
pub struct InputDigest {
    max_history: usize,
}

impl InputDigest {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
        }
    }
}

#[async_trait]
impl Node for InputDigest {
    fn name(&self) -> &'static str {
        "input_digest"
    }

    async fn run(&self, mut state: GraphState) -> Result<GraphState> {
        state
            .messages_history
            .push(ChatMessage::user(state.chat_input.clone()));
        let from = state.messages_history.len().saturating_sub(self.max_history);
        state.messages = state.messages_history[from..].to_vec();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::ChatId,
        memory::ThreadState,
        model::Role,
        pipeline::state::GraphInput,
    };

    #[tokio::test]
    async fn window_keeps_latest_entries() {
        let saved = ThreadState {
            messages_history: (0..6)
                .map(|i| {
                    if i % 2 == 0 {
                        ChatMessage::user(format!("u{i}"))
                    } else {
                        ChatMessage::assistant(format!("a{i}"))
                    }
                })
                .collect(),
            ..Default::default()
        };
        let state = GraphState::new(GraphInput::new(ChatId(1), "nova"), Some(saved));

        let out = InputDigest::new(3).run(state).await.unwrap();
        assert_eq!(out.messages_history.len(), 7);
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[0].content, "u4");
        let last = out.messages.last().unwrap();
        assert_eq!((last.role, last.content.as_str()), (Role::User, "nova"));
    }
}
