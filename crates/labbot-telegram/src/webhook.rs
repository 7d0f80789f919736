use std::{collections::HashMap, path::Path, sync::Arc};

use teloxide::types::{Message, Update, UpdateKind};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use labbot_core::{
    domain::{ChatId, Reply},
    formatting::split_message,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, FileKind},
    },
    security::RateLimiter,
    service::{ConversationService, FALLBACK_REPLY},
};

use crate::input::{Content, IncomingMessage, InputProcessor};

const RESET_COMMAND: &str = "!reset";

/// Extracts the message of a raw webhook update. Malformed updates and other
/// update kinds yield `None`.
pub fn message_from_update(raw: serde_json::Value) -> Option<Message> {
    let update: Update = match serde_json::from_value(raw) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "malformed telegram update");
            return None;
        }
    };
    match update.kind {
        UpdateKind::Message(msg) => Some(msg),
        _ => None,
    }
}

#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Runs one Telegram message through input processing, the conversation
/// service and reply delivery.
pub struct TelegramHandler {
    service: ConversationService,
    input: InputProcessor,
    messenger: Arc<dyn MessagingPort>,
    rate_limiter: Mutex<RateLimiter>,
    chat_locks: ChatLocks,
}

impl TelegramHandler {
    pub fn new(
        service: ConversationService,
        input: InputProcessor,
        messenger: Arc<dyn MessagingPort>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            service,
            input,
            messenger,
            rate_limiter: Mutex::new(rate_limiter),
            chat_locks: ChatLocks::default(),
        }
    }

    pub async fn handle_message(&self, msg: &Message) {
        self.handle(IncomingMessage::from_message(msg)).await;
    }

    pub async fn handle(&self, msg: IncomingMessage) {
        let chat_id = msg.chat_id;

        {
            let mut rl = self.rate_limiter.lock().await;
            if let Err(wait) = rl.check(chat_id) {
                warn!(chat_id = chat_id.0, wait_secs = wait.as_secs_f64(), "rate limited");
                let text = format!(
                    "Muitas mensagens seguidas. Aguarde {:.0} segundos e tente novamente.",
                    wait.as_secs_f64().ceil()
                );
                if let Err(e) = self.messenger.send_text(chat_id, &text).await {
                    error!(chat_id = chat_id.0, error = %e, "failed to send rate limit notice");
                }
                return;
            }
        }

        let _guard = self.chat_locks.lock_chat(chat_id).await;
        info!(chat_id = chat_id.0, kind = msg.kind(), "processing telegram message");

        if self.messenger.capabilities().supports_chat_actions {
            if let Err(e) = self
                .messenger
                .send_chat_action(chat_id, ChatAction::Typing)
                .await
            {
                debug!(chat_id = chat_id.0, error = %e, "failed to send typing action");
            }
        }

        let replies = if matches!(&msg.content, Content::Text(t) if t.trim() == RESET_COMMAND) {
            info!(chat_id = chat_id.0, "reset requested");
            match self.service.reset(chat_id).await {
                Ok(replies) => replies,
                Err(e) => {
                    error!(chat_id = chat_id.0, error = %e, "reset failed");
                    return self.send_text(chat_id, FALLBACK_REPLY).await;
                }
            }
        } else {
            let input = self.input.process(&msg).await;
            self.service.respond(input).await
        };

        self.deliver(chat_id, &replies).await;
    }

    async fn deliver(&self, chat_id: ChatId, replies: &[Reply]) {
        for reply in replies {
            match reply {
                Reply::Text { output } if !output.trim().is_empty() => {
                    self.send_text(chat_id, output).await;
                }
                Reply::Text { .. } => {}
                Reply::File { file_path } => self.send_file(chat_id, Path::new(file_path)).await,
            }
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) {
        let limit = self.messenger.capabilities().max_message_len;
        for chunk in split_message(text, limit) {
            if let Err(e) = self.messenger.send_text(chat_id, &chunk).await {
                error!(chat_id = chat_id.0, error = %e, "failed to send text reply");
                return;
            }
        }
    }

    async fn send_file(&self, chat_id: ChatId, path: &Path) {
        info!(chat_id = chat_id.0, path = %path.display(), "sending file reply");
        let caps = self.messenger.capabilities();
        let sent = match FileKind::for_path(path) {
            FileKind::Photo if caps.supports_photos => {
                self.messenger.send_photo(chat_id, path).await
            }
            _ => self.messenger.send_document(chat_id, path).await,
        };
        if let Err(e) = sent {
            error!(chat_id = chat_id.0, path = %path.display(), error = %e, "failed to send file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use labbot_core::{
        domain::{MessageId, MessageRef},
        memory::{Checkpointer, InMemoryCheckpointer},
        messaging::types::MessagingCapabilities,
        model::ChatMessage,
        pipeline::{Graph, GraphState, InputDigest, Node},
        Result,
    };
    use serde_json::json;

    use crate::input::tests::{FakeFetcher, FakeMedia};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail_actions: bool,
    }

    #[async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_photos: true,
                supports_chat_actions: true,
                max_message_len: 10,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.sent.lock().await.push(format!("text:{text}"));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
            self.sent.lock().await.push(format!("photo:{}", path.display()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(2),
            })
        }

        async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
            self.sent.lock().await.push(format!("document:{}", path.display()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(3),
            })
        }

        async fn send_chat_action(&self, _chat_id: ChatId, action: ChatAction) -> Result<()> {
            if self.fail_actions {
                return Err(labbot_core::errors::Error::External("chat not found".into()));
            }
            self.sent.lock().await.push(format!("action:{action:?}"));
            Ok(())
        }
    }

    /// Echoes the chat input back, then attaches two files.
    struct Echo;

    #[async_trait]
    impl Node for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, mut state: GraphState) -> Result<GraphState> {
            state
                .messages_history
                .push(ChatMessage::assistant(state.chat_input.clone()));
            state.formatted_output = vec![
                Reply::text(state.chat_input.clone()),
                Reply::file("plots/consumo.png"),
                Reply::file("plots/perfil.svg"),
            ];
            Ok(state)
        }
    }

    fn handler(
        cp: Arc<InMemoryCheckpointer>,
        limiter: RateLimiter,
    ) -> (TelegramHandler, Arc<Recorder>) {
        handler_with(cp, limiter, Recorder::default())
    }

    fn handler_with(
        cp: Arc<InMemoryCheckpointer>,
        limiter: RateLimiter,
        recorder: Recorder,
    ) -> (TelegramHandler, Arc<Recorder>) {
        let graph = Graph::new(cp)
            .then(Arc::new(InputDigest::new(10)))
            .then(Arc::new(Echo));
        let recorder = Arc::new(recorder);
        let input = InputProcessor::new(
            Arc::new(FakeFetcher { files: Vec::new() }),
            Arc::new(FakeMedia::default()),
        );
        let h = TelegramHandler::new(
            ConversationService::new(Arc::new(graph)),
            input,
            recorder.clone(),
            limiter,
        );
        (h, recorder)
    }

    fn text(chat: i64, body: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: ChatId(chat),
            content: Content::Text(body.to_string()),
            caption: None,
            phone_number: None,
            user_name: None,
        }
    }

    fn unlimited() -> RateLimiter {
        RateLimiter::new(false, 1, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn delivers_split_text_and_files() {
        let (h, rec) = handler(Arc::new(InMemoryCheckpointer::new()), unlimited());
        h.handle(text(7, "consumo de ontem")).await;

        let sent = rec.sent.lock().await.clone();
        assert_eq!(
            sent,
            vec![
                "action:Typing",
                "text:consumo",
                "text:de ontem",
                "photo:plots/consumo.png",
                "document:plots/perfil.svg",
            ]
        );
    }

    #[tokio::test]
    async fn failed_typing_action_still_delivers() {
        let recorder = Recorder {
            fail_actions: true,
            ..Recorder::default()
        };
        let (h, rec) = handler_with(Arc::new(InMemoryCheckpointer::new()), unlimited(), recorder);
        h.handle(text(8, "oi")).await;

        let sent = rec.sent.lock().await.clone();
        assert_eq!(
            sent,
            vec!["text:oi", "photo:plots/consumo.png", "document:plots/perfil.svg"]
        );
    }

    #[tokio::test]
    async fn reset_command_clears_memory() {
        let cp = Arc::new(InMemoryCheckpointer::new());
        let (h, rec) = handler(cp.clone(), unlimited());
        h.handle(text(9, "oi")).await;
        assert!(cp.load("9").await.unwrap().is_some());

        rec.sent.lock().await.clear();
        h.handle(text(9, " !reset ")).await;
        assert!(cp.load("9").await.unwrap().is_none());

        let sent = rec.sent.lock().await.clone();
        assert_eq!(sent, vec!["action:Typing", "text:Conversa reiniciada!"]);
    }

    #[tokio::test]
    async fn rate_limited_chat_gets_notice_only() {
        let limiter = RateLimiter::new(true, 1, Duration::from_secs(60));
        let (h, rec) = handler(Arc::new(InMemoryCheckpointer::new()), limiter);
        h.handle(text(3, "um")).await;
        rec.sent.lock().await.clear();

        h.handle(text(3, "dois")).await;
        let sent = rec.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("text:Muitas mensagens"));
    }

    #[test]
    fn update_without_message_is_ignored() {
        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 5,
                "date": 1_726_000_000,
                "chat": {"id": 42, "type": "private", "first_name": "Ana"},
                "text": "oi"
            }
        });
        let msg = message_from_update(update).unwrap();
        assert_eq!(msg.chat.id.0, 42);
        assert_eq!(msg.text(), Some("oi"));

        let callback = json!({
            "update_id": 2,
            "callback_query": {
                "id": "c1",
                "from": {"id": 42, "is_bot": false, "first_name": "Ana"},
                "chat_instance": "ci",
                "data": "x"
            }
        });
        assert!(message_from_update(callback).is_none());
        assert!(message_from_update(json!({"foo": 1})).is_none());
    }
}
