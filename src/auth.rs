//! Allow-list of Telegram users permitted to use the bot.

use anyhow::{Context, Result};
use std::collections::HashSet;

/// Reply sent to anyone outside the allow-list.
pub const DENIAL_MESSAGE: &str = "Sorry, you are not authorized to use this bot.";

/// Immutable set of Telegram user ids, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedUsers {
    ids: HashSet<u64>,
}

impl AuthorizedUsers {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse a comma-separated id list. Blank entries are skipped.
    pub fn parse(raw: &str) -> Result<Self> {
        let ids = crate::config::split_list(raw)
            .iter()
            .map(|id| {
                id.parse::<u64>()
                    .with_context(|| format!("Invalid user id: {:?}", id))
            })
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self { ids })
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.ids.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let users = AuthorizedUsers::new([1, 2, 3]);
        assert!(users.is_authorized(2));
        assert!(!users.is_authorized(4));
    }

    #[test]
    fn test_parse_skips_blanks() {
        let users = AuthorizedUsers::parse("10, 20,,30 ,").unwrap();
        assert_eq!(users.len(), 3);
        assert!(users.is_authorized(30));
    }

    #[test]
    fn test_parse_empty_list() {
        let users = AuthorizedUsers::parse("").unwrap();
        assert_eq!(users.len(), 0);
        assert!(!users.is_authorized(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AuthorizedUsers::parse("12,abc").is_err());
        assert!(AuthorizedUsers::parse("-5").is_err());
    }
}
