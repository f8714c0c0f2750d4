//! Recently delivered extractions, kept so the "Send to Email" button can find
//! the text again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Entries kept per user; older ones are evicted first.
pub const MAX_ENTRIES_PER_USER: usize = 20;

/// In-memory extraction store, keyed by user and extraction id.
///
/// Ids have the form `img_{message_id}` or `pdf_{message_id}`.
#[derive(Debug, Clone, Default)]
pub struct ExtractionStore {
    inner: Arc<RwLock<HashMap<u64, VecDeque<(String, String)>>>>,
}

impl ExtractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store text for a user under `extraction_id`, replacing any previous entry.
    pub async fn store(&self, user_id: u64, extraction_id: &str, text: String) {
        let text_len = text.chars().count();
        let mut store = self.inner.write().await;
        let entries = store.entry(user_id).or_default();

        entries.retain(|(id, _)| id != extraction_id);
        entries.push_back((extraction_id.to_string(), text));
        while entries.len() > MAX_ENTRIES_PER_USER {
            entries.pop_front();
        }

        tracing::debug!(
            "ExtractionStore: stored '{}' for user {} ({} chars)",
            extraction_id,
            user_id,
            text_len
        );
    }

    pub async fn get(&self, user_id: u64, extraction_id: &str) -> Option<String> {
        let store = self.inner.read().await;
        store
            .get(&user_id)?
            .iter()
            .find(|(id, _)| id == extraction_id)
            .map(|(_, text)| text.clone())
    }

    #[cfg(test)]
    pub async fn len(&self, user_id: u64) -> usize {
        let store = self.inner.read().await;
        store.get(&user_id).map(VecDeque::len).unwrap_or(0)
    }
}

/// Callback payload prefix of the email button.
pub const EMAIL_CALLBACK_PREFIX: &str = "send_email:";

pub fn email_callback_data(extraction_id: &str) -> String {
    format!("{}{}", EMAIL_CALLBACK_PREFIX, extraction_id)
}

/// Extraction id from button callback data, if it is an email request.
pub fn parse_email_callback(data: &str) -> Option<&str> {
    data.strip_prefix(EMAIL_CALLBACK_PREFIX)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let store = ExtractionStore::new();
        store.store(1, "img_10", "سلام".to_string()).await;
        assert_eq!(store.get(1, "img_10").await.as_deref(), Some("سلام"));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = ExtractionStore::new();
        store.store(1, "img_10", "a".to_string()).await;
        assert!(store.get(2, "img_10").await.is_none());
    }

    #[tokio::test]
    async fn test_oldest_evicted() {
        let store = ExtractionStore::new();
        for i in 0..MAX_ENTRIES_PER_USER + 3 {
            store.store(7, &format!("pdf_{}", i), i.to_string()).await;
        }
        assert_eq!(store.len(7).await, MAX_ENTRIES_PER_USER);
        assert!(store.get(7, "pdf_0").await.is_none());
        assert!(store.get(7, "pdf_2").await.is_none());
        assert_eq!(store.get(7, "pdf_3").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_restore_replaces() {
        let store = ExtractionStore::new();
        store.store(1, "img_1", "old".to_string()).await;
        store.store(1, "img_1", "new".to_string()).await;
        assert_eq!(store.len(1).await, 1);
        assert_eq!(store.get(1, "img_1").await.as_deref(), Some("new"));
    }

    #[test]
    fn test_callback_data() {
        let data = email_callback_data("pdf_42");
        assert_eq!(data, "send_email:pdf_42");
        assert_eq!(parse_email_callback(&data), Some("pdf_42"));
        assert_eq!(parse_email_callback("send_email:"), None);
        assert_eq!(parse_email_callback("other:pdf_42"), None);
    }
}
