use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two outbound calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot; returns how long the caller must wait for it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = self.next.max(now);
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// `MessagingPort` decorator that spaces outbound calls globally and per chat.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<ChatId, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn throttle(&self, chat_id: ChatId) {
        let global_wait = self.global.lock().await.reserve();
        let limiter = {
            let mut map = self.per_chat.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(IntervalLimiter::new(
                        self.cfg.per_chat_min_interval,
                    )))
                })
                .clone()
        };
        let chat_wait = limiter.lock().await.reserve();

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.throttle(chat_id).await;
        self.inner.send_text(chat_id, text).await
    }

    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
        self.throttle(chat_id).await;
        self.inner.send_photo(chat_id, path).await
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
        self.throttle(chat_id).await;
        self.inner.send_document(chat_id, path).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;

    struct Recorder {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait::async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_photos: true,
                supports_chat_actions: true,
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().await;
            sent.push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }

        async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
            self.send_text(chat_id, &path.display().to_string()).await
        }

        async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef> {
            self.send_text(chat_id, &path.display().to_string()).await
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_chat_calls_are_spaced() {
        let inner = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
        });
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(10),
                per_chat_min_interval: Duration::from_millis(500),
            },
        );

        let started = Instant::now();
        throttled.send_text(ChatId(1), "a").await.unwrap();
        throttled.send_text(ChatId(1), "b").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));

        let before_other = Instant::now();
        throttled.send_text(ChatId(2), "c").await.unwrap();
        assert!(before_other.elapsed() < Duration::from_millis(500));

        assert_eq!(inner.sent.lock().await.len(), 3);
    }
}
