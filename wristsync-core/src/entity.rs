//! Exercise value type and the locale it is queried under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback when the environment carries no usable locale.
pub const DEFAULT_LOCALE: &str = "en_US";

/// An exercise as shown on either device. Built by the data layer; never mutated after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseEntity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_official: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_count: Option<u32>,
}

impl ExerciseEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_official: None,
            last_used_at: None,
            use_count: None,
        }
    }

    pub fn with_official(mut self, official: bool) -> Self {
        self.is_official = Some(official);
        self
    }

    pub fn with_last_used(mut self, at: DateTime<Utc>) -> Self {
        self.last_used_at = Some(at);
        self
    }

    pub fn with_use_count(mut self, count: u32) -> Self {
        self.use_count = Some(count);
        self
    }
}

/// Locale identifier such as `en_US` or `de_DE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Locale(tag.into())
    }

    /// Device-local locale from `LC_ALL`, `LC_MESSAGES` or `LANG`, in that order.
    pub fn current() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find_map(|value| Self::parse_posix(&value))
            .unwrap_or_else(|| Locale(DEFAULT_LOCALE.to_string()))
    }

    /// Parse a POSIX locale string (`en_US.UTF-8@euro`). `C`, `POSIX` and empty yield `None`.
    pub fn parse_posix(value: &str) -> Option<Self> {
        let tag = value
            .split(['.', '@'])
            .next()
            .unwrap_or_default()
            .trim();
        if tag.is_empty() || tag == "C" || tag == "POSIX" {
            return None;
        }
        Some(Locale(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale(DEFAULT_LOCALE.to_string())
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
