use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use labbot_core::{
    config::{LlmSettings, OmniModelSettings},
    errors::Error,
    media::MediaInterpreter,
    model::Role,
    prompt::PromptStore,
    Result,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    http::{build_client, endpoint, send_with_retry},
    wire::{WireMessage, WireRequest, WireResponse},
};

const TRANSCRIPTION_LANGUAGE: &str = "pt";

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

/// Audio transcription and image description against the Groq API.
pub struct GroqMediaInterpreter {
    audio_http: reqwest::Client,
    vision_http: reqwest::Client,
    audio: LlmSettings,
    omni: OmniModelSettings,
    prompts: Arc<PromptStore>,
}

impl GroqMediaInterpreter {
    pub fn new(
        audio: &LlmSettings,
        omni: &OmniModelSettings,
        prompts: Arc<PromptStore>,
    ) -> Result<Self> {
        Ok(Self {
            audio_http: build_client(audio.timeout)?,
            vision_http: build_client(omni.llm.timeout)?,
            audio: audio.clone(),
            omni: omni.clone(),
            prompts,
        })
    }
}

#[async_trait]
impl MediaInterpreter for GroqMediaInterpreter {
    async fn transcribe_audio(&self, bytes: Vec<u8>, file_name: &str) -> Result<String> {
        info!(size = bytes.len(), "transcribing audio");
        let prompt = self.prompts.get(&self.audio.prompt_name)?;
        let url = endpoint(&self.audio.base_url, "audio/transcriptions");

        let resp = send_with_retry("audio transcription", || {
            let file = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(file_name.to_string())
                .mime_str("application/octet-stream")
                .map_err(|e| Error::External(format!("multipart error: {e}")))?;
            let mut form = reqwest::multipart::Form::new()
                .part("file", file)
                .text("model", self.audio.model.clone())
                .text("response_format", "verbose_json")
                .text("language", TRANSCRIPTION_LANGUAGE)
                .text("temperature", self.audio.temperature.to_string());
            if !prompt.trim().is_empty() {
                form = form.text("prompt", prompt.clone());
            }
            Ok(self
                .audio_http
                .post(&url)
                .bearer_auth(&self.audio.api_key)
                .multipart(form))
        })
        .await?;

        let t: Transcription = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("transcription json error: {e}")))?;
        let text = t.text.trim();
        if text.is_empty() {
            return Err(Error::External("transcription returned empty text".to_string()));
        }
        Ok(text.to_string())
    }

    async fn describe_image(&self, bytes: Vec<u8>, mime: &str) -> Result<String> {
        info!(size = bytes.len(), "describing image");
        let prompt = self.prompts.get(&self.omni.llm.prompt_name)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        debug!(encoded_len = encoded.len(), "image encoded to base64");

        let body = WireRequest {
            model: &self.omni.llm.model,
            messages: vec![WireMessage {
                role: Role::User,
                content: json!([
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": format!("data:{mime};base64,{encoded}")}},
                ]),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
            temperature: self.omni.llm.temperature,
            tools: Vec::new(),
            response_format: None,
            max_completion_tokens: Some(self.omni.max_completion_tokens),
            top_p: Some(self.omni.top_p),
        };
        let url = endpoint(&self.omni.llm.base_url, "chat/completions");

        let resp = send_with_retry("image description", || {
            Ok(self
                .vision_http
                .post(&url)
                .bearer_auth(&self.omni.llm.api_key)
                .json(&body))
        })
        .await?;

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("image description json error: {e}")))?;
        let content = wire.into_chat_response()?.message.content;
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::External("image description returned empty text".to_string()));
        }
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn llm(base_url: &str, model: &str, prompt_name: &str) -> LlmSettings {
        LlmSettings {
            api_key: "k".into(),
            base_url: base_url.to_string(),
            model: model.into(),
            temperature: 0.0,
            timeout: Duration::from_secs(5),
            prompt_name: prompt_name.into(),
        }
    }

    fn interpreter(base_url: &str) -> GroqMediaInterpreter {
        let dir = std::env::temp_dir().join(format!("labbot-media-{}", unique_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("audio_transcription.md"), "Laboratório, kWh").unwrap();
        std::fs::write(dir.join("image_description.md"), "Descreva a imagem.").unwrap();
        GroqMediaInterpreter::new(
            &llm(base_url, "whisper-large-v3-turbo", "audio_transcription"),
            &OmniModelSettings {
                llm: llm(base_url, "vision", "image_description"),
                max_completion_tokens: 256,
                top_p: 0.9,
            },
            Arc::new(PromptStore::new(dir)),
        )
        .unwrap()
    }

    fn unique_suffix() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    #[tokio::test]
    async fn transcription_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": " qual o consumo? "})),
            )
            .mount(&server)
            .await;

        let text = interpreter(&server.uri())
            .transcribe_audio(vec![1, 2, 3], "voice.ogg")
            .await
            .unwrap();
        assert_eq!(text, "qual o consumo?");

        let reqs = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&reqs[0].body);
        assert!(body.contains("whisper-large-v3-turbo"));
        assert!(body.contains("name=\"language\""));
    }

    #[tokio::test]
    async fn empty_transcription_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": ""})))
            .mount(&server)
            .await;
        assert!(interpreter(&server.uri())
            .transcribe_audio(vec![0], "a.ogg")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn image_is_sent_as_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "vision", "max_completion_tokens": 256})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Um medidor trifásico."}}]
            })))
            .mount(&server)
            .await;

        let text = interpreter(&server.uri())
            .describe_image(b"jpg".to_vec(), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(text, "Um medidor trifásico.");

        let reqs = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&reqs[0].body).unwrap();
        let url = body["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/jpeg;base64,anBn");
    }
}
