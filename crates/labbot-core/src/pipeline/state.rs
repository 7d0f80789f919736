use crate::{
    domain::{ChatId, Reply},
    memory::ThreadState,
    model::{ChatMessage, Role},
};

/// What a caller hands to the graph for one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphInput {
    pub chat_input: String,
    pub chat_id: ChatId,
    pub phone_number: Option<String>,
    pub user_name: Option<String>,
}

impl GraphInput {
    pub fn new(chat_id: ChatId, chat_input: impl Into<String>) -> Self {
        Self {
            chat_input: chat_input.into(),
            chat_id,
            phone_number: None,
            user_name: None,
        }
    }
}

/// State threaded through the nodes of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphState {
    pub chat_input: String,
    pub chat_id: ChatId,
    pub phone_number: Option<String>,
    pub user_name: Option<String>,
    /// Working window sent to the agent (grows with tool chatter during the run).
    pub messages: Vec<ChatMessage>,
    /// Persisted user/assistant turns.
    pub messages_history: Vec<ChatMessage>,
    pub formatted_output: Vec<Reply>,
}

impl GraphState {
    pub fn new(input: GraphInput, saved: Option<ThreadState>) -> Self {
        let saved = saved.unwrap_or_default();
        Self {
            chat_input: input.chat_input,
            chat_id: input.chat_id,
            phone_number: input.phone_number.or(saved.phone_number),
            user_name: input.user_name.or(saved.user_name),
            messages: Vec::new(),
            messages_history: saved.messages_history,
            formatted_output: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> String {
        self.chat_id.0.to_string()
    }

    /// Content of the latest assistant message without tool calls.
    pub fn last_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.tool_calls.is_empty())
            .map(|m| m.content.as_str())
    }

    pub fn to_thread_state(&self) -> ThreadState {
        ThreadState {
            messages_history: self.messages_history.clone(),
            user_name: self.user_name.clone(),
            phone_number: self.phone_number.clone(),
        }
    }
}
