//! Getting extracted text back to the user: chat replies and email.

use crate::mailer::{EmailError, Mailer, EMAIL_SUBJECT};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Telegram rejects messages over 4096 chars; stay below with some slack.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Id of a message the bot sent.
pub type MessageRef = i32;

/// One chat, as seen by the handlers. Implemented over teloxide in `bot.rs`.
#[async_trait::async_trait]
pub trait Conversation: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<MessageRef>;
    /// Send `text` with an inline "Send to Email" button for `extraction_id`.
    async fn send_email_offer(&self, text: &str, extraction_id: &str) -> Result<MessageRef>;
    async fn delete_message(&self, message: MessageRef) -> Result<()>;
    async fn clear_buttons(&self, message: MessageRef) -> Result<()>;
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// Send a status line; failures are logged, never propagated.
pub async fn notify(conversation: &dyn Conversation, text: &str) -> Option<MessageRef> {
    match conversation.send_text(text).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Failed to send message {:?}: {}", text, e);
            None
        }
    }
}

/// Split `text` into chunks of at most `limit` characters (not bytes).
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Clone)]
pub struct Delivery {
    mailer: Arc<dyn Mailer>,
}

impl Delivery {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Send `text` as one or more chat messages, "(continued...)" between
    /// chunks. Returns the id of the last text chunk.
    pub async fn send_reply(
        &self,
        conversation: &dyn Conversation,
        text: &str,
    ) -> Result<MessageRef> {
        let chunks = split_message(text, MAX_CHUNK_CHARS);
        let count = chunks.len();
        let mut last = None;

        for (i, chunk) in chunks.iter().enumerate() {
            last = Some(conversation.send_text(chunk).await?);
            if i + 1 < count {
                notify(conversation, "(continued...)").await;
            }
        }

        if count > 1 {
            info!("Reply split into {} chunks", count);
        }

        last.ok_or_else(|| anyhow::anyhow!("refusing to send an empty reply"))
    }

    pub async fn send_email(&self, address: &str, text: &str) -> Result<(), EmailError> {
        self.mailer.send(address, EMAIL_SUBJECT, text).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory conversation and mailer used by the handler tests.

    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text(String),
        EmailOffer { text: String, extraction_id: String },
        Deleted(MessageRef),
        ButtonsCleared(MessageRef),
    }

    #[derive(Default)]
    pub struct FakeConversation {
        pub sent: Mutex<Vec<Sent>>,
        pub files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
        pub downloads: Mutex<Vec<String>>,
        next_id: AtomicI32,
    }

    impl FakeConversation {
        pub fn with_file(self, file_id: &str, data: Vec<u8>) -> Self {
            self.files.lock().unwrap().insert(file_id.to_string(), data);
            self
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn email_offers(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::EmailOffer { extraction_id, .. } => Some(extraction_id.clone()),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, sent: Sent) -> MessageRef {
            self.sent.lock().unwrap().push(sent);
            self.next_id.fetch_add(1, Ordering::SeqCst) + 100
        }
    }

    #[async_trait::async_trait]
    impl Conversation for FakeConversation {
        async fn send_text(&self, text: &str) -> Result<MessageRef> {
            Ok(self.push(Sent::Text(text.to_string())))
        }

        async fn send_email_offer(&self, text: &str, extraction_id: &str) -> Result<MessageRef> {
            Ok(self.push(Sent::EmailOffer {
                text: text.to_string(),
                extraction_id: extraction_id.to_string(),
            }))
        }

        async fn delete_message(&self, message: MessageRef) -> Result<()> {
            self.push(Sent::Deleted(message));
            Ok(())
        }

        async fn clear_buttons(&self, message: MessageRef) -> Result<()> {
            self.push(Sent::ButtonsCleared(message));
            Ok(())
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
            self.downloads.lock().unwrap().push(file_id.to_string());
            self.files
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file: {}", file_id))
        }
    }

    /// Records every email; fails them all when `fail` is set.
    #[derive(Default)]
    pub struct FakeMailer {
        pub fail: bool,
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), EmailError> {
            if self.fail {
                return Err(EmailError::Auth("535 bad credentials".into()));
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }
}
