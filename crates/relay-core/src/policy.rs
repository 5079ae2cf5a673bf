//! Relay policy: where to listen, where to forward, what to look for.

use thiserror::Error;

/// Keyword used when none is configured.
pub const DEFAULT_TRIGGER: &str = "fraude";

/// Prefix of the plain-text fallback notification.
pub const DEFAULT_FALLBACK_PREFIX: &str = "🚨 Mensaje reenviado del Grupo 1:";

/// Policy construction error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("source conversation id is not configured")]
    MissingSource,
    #[error("destination conversation id is not configured")]
    MissingDestination,
    #[error("trigger keyword is empty")]
    EmptyTrigger,
}

/// Case-insensitive substring trigger.
///
/// Matching is plain containment on lower-cased text, with no word
/// boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    keyword: String,
}

impl Trigger {
    /// Create a trigger for `keyword`.
    ///
    /// # Errors
    /// Returns error if the keyword is empty.
    pub fn new(keyword: &str) -> Result<Self, PolicyError> {
        if keyword.is_empty() {
            return Err(PolicyError::EmptyTrigger);
        }
        Ok(Self {
            keyword: keyword.to_lowercase(),
        })
    }

    /// The lower-cased keyword.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether `text` contains the keyword in any letter-casing.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.keyword)
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_TRIGGER.to_string(),
        }
    }
}

/// Immutable relay configuration.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    source: String,
    destination: String,
    trigger: Trigger,
    fallback_prefix: String,
}

impl RelayPolicy {
    /// Create a policy with the default trigger and fallback prefix.
    ///
    /// # Errors
    /// Returns error if either conversation id is blank.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        let source = source.into();
        let destination = destination.into();
        if source.trim().is_empty() {
            return Err(PolicyError::MissingSource);
        }
        if destination.trim().is_empty() {
            return Err(PolicyError::MissingDestination);
        }
        Ok(Self {
            source,
            destination,
            trigger: Trigger::default(),
            fallback_prefix: DEFAULT_FALLBACK_PREFIX.to_string(),
        })
    }

    /// Replace the trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Replace the fallback prefix.
    #[must_use]
    pub fn with_fallback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fallback_prefix = prefix.into();
        self
    }

    /// Conversation watched for triggers.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Conversation receiving relayed messages.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub const fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Compose the plain-text notification sent when verbatim relay fails.
    #[must_use]
    pub fn fallback_text(&self, original: &str) -> String {
        format!("{}\n\"{original}\"", self.fallback_prefix)
    }
}
