use async_trait::async_trait;

use crate::Result;

/// Turns non-text media into text the agent can read.
#[async_trait]
pub trait MediaInterpreter: Send + Sync {
    /// Speech to text.
    async fn transcribe_audio(&self, bytes: Vec<u8>, file_name: &str) -> Result<String>;

    /// Describes an image; `mime` is the image content type (e.g. `image/jpeg`).
    async fn describe_image(&self, bytes: Vec<u8>, mime: &str) -> Result<String>;
}
