use serde::{Deserialize, Serialize};

/// Chat id (Telegram chat or HTTP API conversation). Also the memory thread id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// One outgoing reply produced by the pipeline.
///
/// Wire shape is `{"output": "..."}` or `{"filePath": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Text {
        output: String,
    },
    File {
        #[serde(rename = "filePath")]
        file_path: String,
    },
}

impl Reply {
    pub fn text(output: impl Into<String>) -> Self {
        Reply::Text {
            output: output.into(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Reply::File {
            file_path: path.into(),
        }
    }
}
