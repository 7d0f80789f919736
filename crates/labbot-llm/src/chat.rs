use async_trait::async_trait;
use labbot_core::{
    config::LlmSettings,
    errors::Error,
    model::{ChatModel, ChatRequest, ChatResponse, ResponseFormat},
    Result,
};
use tracing::debug;

use crate::{
    http::{build_client, endpoint, send_with_retry},
    wire::{WireMessage, WireRequest, WireResponse, WireTool, JSON_OBJECT},
};

/// `POST {base_url}/chat/completions` client.
#[derive(Clone, Debug)]
pub struct OpenAiChatModel {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        debug!(
            model = %settings.model,
            temperature = settings.temperature,
            timeout_secs = settings.timeout.as_secs(),
            "creating chat model"
        );
        Ok(Self {
            http: build_client(settings.timeout)?,
            url: endpoint(&settings.base_url, "chat/completions"),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = WireRequest {
            model: &self.model,
            messages: req.messages.iter().map(WireMessage::from).collect(),
            temperature: self.temperature,
            tools: req.tools.iter().map(WireTool::from).collect(),
            response_format: match req.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(JSON_OBJECT),
            },
            max_completion_tokens: None,
            top_p: None,
        };

        let resp = send_with_retry("chat completion", || {
            Ok(self.http.post(&self.url).bearer_auth(&self.api_key).json(&body))
        })
        .await?;

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("chat completion json error: {e}")))?;
        wire.into_chat_response()
    }
}
