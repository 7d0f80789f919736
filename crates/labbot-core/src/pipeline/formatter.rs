use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    domain::Reply,
    errors::Error,
    formatting::strip_code_fences,
    model::{ChatMessage, ChatModel, ChatRequest, ResponseFormat},
    pipeline::{graph::Node, state::GraphState},
    prompt::PromptStore,
    security::is_within_dir,
    Result,
};

#[derive(Debug, Deserialize)]
struct FormattedMessages {
    messages: Vec<Reply>,
}

/// Turns the agent answer into a list of text and file replies.
pub struct Formatter {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptStore>,
    prompt_name: String,
    plots_dir: PathBuf,
}

impl Formatter {
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompts: Arc<PromptStore>,
        prompt_name: impl Into<String>,
        plots_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model,
            prompts,
            prompt_name: prompt_name.into(),
            plots_dir: plots_dir.into(),
        }
    }

    async fn format(&self, answer: &str) -> Result<Vec<Reply>> {
        let system = self.prompts.get(&self.prompt_name)?;
        let resp = self
            .model
            .chat(ChatRequest {
                messages: vec![ChatMessage::system(system), ChatMessage::user(answer)],
                tools: Vec::new(),
                response_format: ResponseFormat::JsonObject,
            })
            .await?;

        let raw = strip_code_fences(&resp.message.content);
        let parsed: FormattedMessages = serde_json::from_str(raw)?;
        Ok(keep_allowed(parsed.messages, &self.plots_dir))
    }
}

/// Drops empty texts and files that live outside `plots_dir`.
fn keep_allowed(replies: Vec<Reply>, plots_dir: &Path) -> Vec<Reply> {
    replies
        .into_iter()
        .filter(|r| match r {
            Reply::Text { output } => !output.trim().is_empty(),
            Reply::File { file_path } => {
                let ok = is_within_dir(Path::new(file_path), plots_dir);
                if !ok {
                    warn!(file_path, "dropping file reply outside the plots directory");
                }
                ok
            }
        })
        .collect()
}

#[async_trait]
impl Node for Formatter {
    fn name(&self) -> &'static str {
        "formatter"
    }

    async fn run(&self, mut state: GraphState) -> Result<GraphState> {
        let answer = state
            .last_answer()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidInput("no answer to format".into()))?;

        let replies = match self.format(&answer).await {
            Ok(replies) if !replies.is_empty() => replies,
            Ok(_) => {
                debug!("formatter produced nothing usable, sending raw answer");
                vec![Reply::text(answer)]
            }
            Err(e) => {
                warn!(error = %e, "formatter failed, sending raw answer");
                vec![Reply::text(answer)]
            }
        };
        state.formatted_output = replies;
        Ok(state)
    }
}
