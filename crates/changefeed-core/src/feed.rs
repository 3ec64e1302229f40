//! Feed naming

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Maximum length of a feed name in bytes
pub const MAX_FEED_NAME_LEN: usize = 128;

/// Name of an independently retained and pruned feed
///
/// Feed names key the persisted root anchor, so they must be stable,
/// non-empty, and free of control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedName(String);

impl FeedName {
    /// Name of the feed used when none is configured
    pub const DEFAULT: &'static str = "changefeed";

    /// Create a validated feed name
    pub fn new(name: impl Into<String>) -> Result<Self, FeedError> {
        let name = name.into();
        if name.is_empty() {
            return Err(FeedError::InvalidFeedName("name is empty".into()));
        }
        if name.len() > MAX_FEED_NAME_LEN {
            return Err(FeedError::InvalidFeedName(format!(
                "name is {} bytes, at most {} allowed",
                name.len(),
                MAX_FEED_NAME_LEN
            )));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(FeedError::InvalidFeedName(format!(
                "{:?} contains control characters",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FeedName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl Display for FeedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FeedName {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for FeedName {
    type Error = FeedError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeedName> for String {
    fn from(name: FeedName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(FeedName::new("orders").unwrap().as_str(), "orders");
        assert_eq!(FeedName::default().as_str(), FeedName::DEFAULT);
    }

    #[test]
    fn test_rejects_empty_and_control() {
        assert!(matches!(FeedName::new(""), Err(FeedError::InvalidFeedName(_))));
        assert!(FeedName::new("bad\nname").is_err());
        assert!(FeedName::new("x".repeat(MAX_FEED_NAME_LEN + 1)).is_err());
        assert!(FeedName::new("x".repeat(MAX_FEED_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let name: FeedName = serde_json::from_str("\"audit\"").unwrap();
        assert_eq!(name.as_str(), "audit");
        assert!(serde_json::from_str::<FeedName>("\"\"").is_err());
    }
}
