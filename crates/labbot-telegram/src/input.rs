use std::sync::Arc;

use async_trait::async_trait;
use teloxide::{net::Download, prelude::*};
use tracing::{error, info, warn};

use labbot_core::{
    domain::ChatId, errors::Error, media::MediaInterpreter, pipeline::GraphInput, Result,
};

const AUDIO_PREFIX: &str = "Transcrição de Áudio: ";
const IMAGE_PREFIX: &str = "Descrição de Imagem: ";

const AUDIO_FAILURE: &str = "Não foi possível transcrever o áudio recebido. Ele pode ser vazio, estar corrompido ou mesmo protegido por senha.";
const IMAGE_FAILURE: &str = "Não foi possível interpretar a imagem recebida. Ela pode ser vazia, estar corrompida ou mesmo protegida por senha.";

pub const UNSUPPORTED_INPUT: &str = "O usuário enviou um tipo de mensagem não suportado. Informe que apenas mensagens de texto, áudio e fotos são aceitas.";

/// Telegram only sends photos as JPEG.
const PHOTO_MIME: &str = "image/jpeg";

/// Downloads a Telegram file by id.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>>;
}

pub struct BotFileFetcher {
    bot: Bot,
}

impl BotFileFetcher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl FileFetcher for BotFileFetcher {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(file_id)
            .await
            .map_err(|e| Error::External(format!("telegram get_file failed: {e}")))?;

        let mut dst = Vec::with_capacity(file.size as usize);
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::External(format!("telegram download failed: {e}")))?;
        Ok(dst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Audio { file_id: String, file_name: String },
    Voice { file_id: String },
    Photo { file_id: String },
    Unsupported,
}

/// The parts of a Telegram message the bot cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub content: Content,
    pub caption: Option<String>,
    pub phone_number: Option<String>,
    pub user_name: Option<String>,
}

impl IncomingMessage {
    pub fn from_message(msg: &Message) -> Self {
        let content = if let Some(text) = msg.text() {
            Content::Text(text.to_string())
        } else if let Some(audio) = msg.audio() {
            Content::Audio {
                file_id: audio.file.id.clone(),
                file_name: audio
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "audio.mp3".to_string()),
            }
        } else if let Some(voice) = msg.voice() {
            Content::Voice {
                file_id: voice.file.id.clone(),
            }
        } else if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
            Content::Photo {
                file_id: largest.file.id.clone(),
            }
        } else {
            Content::Unsupported
        };

        Self {
            chat_id: ChatId(msg.chat.id.0),
            content,
            caption: msg.caption().map(str::to_string),
            phone_number: msg.contact().map(|c| c.phone_number.clone()),
            user_name: msg.from().map(|u| u.full_name()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.content {
            Content::Text(_) => "text",
            Content::Audio { .. } => "audio",
            Content::Voice { .. } => "voice",
            Content::Photo { .. } => "photo",
            Content::Unsupported => "unsupported",
        }
    }
}

/// Turns an incoming message into the text the pipeline reads.
pub struct InputProcessor {
    fetcher: Arc<dyn FileFetcher>,
    media: Arc<dyn MediaInterpreter>,
}

impl InputProcessor {
    pub fn new(fetcher: Arc<dyn FileFetcher>, media: Arc<dyn MediaInterpreter>) -> Self {
        Self { fetcher, media }
    }

    pub async fn process(&self, msg: &IncomingMessage) -> GraphInput {
        let chat_id = msg.chat_id;
        info!(chat_id = chat_id.0, kind = msg.kind(), "processing telegram input");

        let mut chat_input = match &msg.content {
            Content::Text(text) => text.clone(),
            Content::Audio { file_id, file_name } => self.transcribe(file_id, file_name).await,
            Content::Voice { file_id } => self.transcribe(file_id, "voice.ogg").await,
            Content::Photo { file_id } => self.describe(file_id).await,
            Content::Unsupported => UNSUPPORTED_INPUT.to_string(),
        };

        if let Some(caption) = msg.caption.as_deref().filter(|c| !c.is_empty()) {
            chat_input = format!("{chat_input}\nLegenda: {caption}");
        }

        GraphInput {
            chat_input,
            chat_id,
            phone_number: msg.phone_number.clone(),
            user_name: msg.user_name.clone(),
        }
    }

    async fn download(&self, file_id: &str) -> Vec<u8> {
        match self.fetcher.fetch(file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(file_id, error = %e, "failed to download telegram file");
                Vec::new()
            }
        }
    }

    async fn transcribe(&self, file_id: &str, file_name: &str) -> String {
        let bytes = self.download(file_id).await;
        if bytes.is_empty() {
            warn!(file_id, "audio is empty, skipping transcription");
            return format!("{AUDIO_PREFIX}{AUDIO_FAILURE}");
        }
        info!(size = bytes.len(), "transcribing audio");
        match self.media.transcribe_audio(bytes, file_name).await {
            Ok(text) => format!("{AUDIO_PREFIX}{text}"),
            Err(e) => {
                error!(error = %e, "audio transcription failed");
                format!("{AUDIO_PREFIX}{AUDIO_FAILURE}")
            }
        }
    }

    async fn describe(&self, file_id: &str) -> String {
        let bytes = self.download(file_id).await;
        if bytes.is_empty() {
            warn!(file_id, "image is empty, skipping description");
            return format!("{IMAGE_PREFIX}{IMAGE_FAILURE}");
        }
        info!(size = bytes.len(), "interpreting image");
        match self.media.describe_image(bytes, PHOTO_MIME).await {
            Ok(text) => format!("{IMAGE_PREFIX}{text}"),
            Err(e) => {
                error!(error = %e, "image description failed");
                format!("{IMAGE_PREFIX}{IMAGE_FAILURE}")
            }
        }
    }
}
