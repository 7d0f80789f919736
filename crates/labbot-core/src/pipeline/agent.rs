use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    analytics::period::Clock,
    errors::Error,
    model::{ChatMessage, ChatModel, ChatRequest, ResponseFormat},
    pipeline::{graph::Node, state::GraphState},
    prompt::PromptStore,
    tools::ToolRegistry,
    Result,
};

/// Tool-calling agent node.
pub struct MainBot {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    prompts: Arc<PromptStore>,
    prompt_name: String,
    bot_name: String,
    clock: Arc<dyn Clock>,
    max_tool_rounds: usize,
}

impl MainBot {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        prompts: Arc<PromptStore>,
        prompt_name: impl Into<String>,
        bot_name: impl Into<String>,
        clock: Arc<dyn Clock>,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            model,
            tools,
            prompts,
            prompt_name: prompt_name.into(),
            bot_name: bot_name.into(),
            clock,
            max_tool_rounds: max_tool_rounds.max(1),
        }
    }

    fn system_prompt(&self, state: &GraphState) -> Result<String> {
        let today = self.clock.today().format("%d/%m/%Y").to_string();
        let user_name = state.user_name.as_deref().unwrap_or("usuário");
        self.prompts.render(
            &self.prompt_name,
            &[
                ("bot_name", self.bot_name.as_str()),
                ("today", today.as_str()),
                ("user_name", user_name),
            ],
        )
    }
}

#[async_trait]
impl Node for MainBot {
    fn name(&self) -> &'static str {
        "main_bot"
    }

    async fn run(&self, mut state: GraphState) -> Result<GraphState> {
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt(&state)?));
        messages.extend(state.messages.iter().cloned());

        let definitions = self.tools.definitions();
        let mut rounds = 0usize;

        let answer = loop {
            // Once the round budget is spent the model must answer without tools.
            let tools = if rounds < self.max_tool_rounds {
                definitions.clone()
            } else {
                Vec::new()
            };
            let resp = self
                .model
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools,
                    response_format: ResponseFormat::Text,
                })
                .await?;
            if let Some(usage) = &resp.usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "main model usage"
                );
            }

            let msg = resp.message;
            if msg.tool_calls.is_empty() {
                break msg.content;
            }
            if rounds >= self.max_tool_rounds {
                warn!(rounds, "model kept calling tools after the round limit");
                break msg.content;
            }

            rounds += 1;
            info!(
                round = rounds,
                calls = msg.tool_calls.len(),
                "model requested tools"
            );
            let calls = msg.tool_calls.clone();
            messages.push(msg);
            for call in &calls {
                let output = self.tools.dispatch(call).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), output));
            }
        };

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(Error::External("main model returned an empty answer".into()));
        }

        // Tool chatter stays in the working window only.
        state.messages = messages.into_iter().skip(1).collect();
        state.messages.push(ChatMessage::assistant(answer.clone()));
        state.messages_history.push(ChatMessage::assistant(answer));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::period::{FixedClock, PinnedClock},
        domain::ChatId,
        model::{Role, ToolDefinition},
        pipeline::state::GraphInput,
        testing::{tool_call_message, ScriptedModel},
        tools::Tool,
    };
    use chrono::NaiveDate;
    use std::path::PathBuf;

    struct Sum;

    #[async_trait]
    impl Tool for Sum {
        fn name(&self) -> &str {
            "Sum"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "Sum".into(),
                description: "soma".into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, arguments: &str) -> Result<String> {
            let v: Vec<i64> = crate::tools::parse_args(arguments)?;
            Ok(v.iter().sum::<i64>().to_string())
        }
    }

    fn prompts() -> Arc<PromptStore> {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("labbot-agent-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main_bot.md"), "Você é {bot_name}. Hoje é {today}.").unwrap();
        Arc::new(PromptStore::new(dir))
    }

    fn bot(model: Arc<ScriptedModel>, rounds: usize) -> MainBot {
        let clock = FixedClock(
            NaiveDate::from_ymd_opt(2025, 9, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        MainBot::new(
            model,
            ToolRegistry::new().with(Arc::new(Sum)),
            prompts(),
            "main_bot",
            "LABI",
            Arc::new(clock),
            rounds,
        )
    }

    fn state(text: &str) -> GraphState {
        let mut s = GraphState::new(GraphInput::new(ChatId(1), text), None);
        s.messages = vec![ChatMessage::user(text)];
        s.messages_history = s.messages.clone();
        s
    }

    #[tokio::test]
    async fn executes_tools_then_answers() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_message(&[("c1", "Sum", "[2, 3]")])),
            Ok(ChatMessage::assistant("Deu 5.")),
        ]));
        let out = bot(model.clone(), 6).run(state("2+3?")).await.unwrap();

        assert_eq!(out.messages_history.len(), 2);
        assert_eq!(out.messages_history[1].content, "Deu 5.");
        assert_eq!(out.last_answer(), Some("Deu 5."));

        let reqs = model.requests.lock().await;
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].messages[0].content, "Você é LABI. Hoje é 15/09/2025.");
        assert_eq!(reqs[0].tools.len(), 1);
        let tool_msg = reqs[1].messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.content, "5");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn round_limit_forces_a_plain_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_message(&[("c1", "Sum", "[1]")])),
            Ok(tool_call_message(&[("c2", "Sum", "[1]")])),
            Ok(ChatMessage::assistant("Pronto.")),
        ]));
        let out = bot(model.clone(), 2).run(state("loop")).await.unwrap();
        assert_eq!(out.last_answer(), Some("Pronto."));
        let reqs = model.requests.lock().await;
        assert_eq!(reqs.len(), 3);
        assert!(reqs[2].tools.is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_message(&[("c1", "Nope", "{}")])),
            Ok(ChatMessage::assistant("Não consegui.")),
        ]));
        bot(model.clone(), 6).run(state("x")).await.unwrap();
        let reqs = model.requests.lock().await;
        assert!(reqs[1].messages.last().unwrap().content.starts_with("Erro: "));
    }

    #[tokio::test]
    async fn pinned_reference_date_is_today_in_the_prompt() {
        let model = Arc::new(ScriptedModel::answering(&["Ok."]));
        let pinned = PinnedClock::new(NaiveDate::from_ymd_opt(2025, 9, 15).unwrap());
        let bot = MainBot::new(
            model.clone(),
            ToolRegistry::new(),
            prompts(),
            "main_bot",
            "LABI",
            Arc::new(pinned),
            6,
        );
        bot.run(state("oi")).await.unwrap();
        let reqs = model.requests.lock().await;
        assert_eq!(reqs[0].messages[0].content, "Você é LABI. Hoje é 15/09/2025.");
    }

    #[tokio::test]
    async fn empty_answer_is_an_error() {
        let model = Arc::new(ScriptedModel::answering(&["   "]));
        assert!(bot(model, 6).run(state("x")).await.is_err());
    }
}
