//! OpenAI-compatible adapter (Groq by default).
//!
//! Chat completions with tool calling and JSON mode, Whisper-style audio
//! transcription and image description through a vision model.

pub mod chat;
mod http;
pub mod media;
mod wire;

pub use chat::OpenAiChatModel;
pub use media::GroqMediaInterpreter;
