//! Unknown-attribute warnings
//!
//! The daemon grows new fields faster than clients learn about them. Unknown
//! fields are dropped, and reported through a per-client sink that
//! de-duplicates by field name.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

/// How often an unknown server field is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningPolicy {
    /// Never warn
    None,
    /// Warn once per field name
    #[default]
    Once,
    /// Warn on every occurrence
    Always,
}

impl WarningPolicy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" | "off" | "never" => Self::None,
            "always" => Self::Always,
            _ => Self::Once,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Once => "once",
            Self::Always => "always",
        }
    }
}

/// De-duplicating sink for unknown-attribute warnings
#[derive(Debug, Default)]
pub struct WarningSink {
    policy: WarningPolicy,
    seen: Mutex<HashSet<String>>,
}

impl WarningSink {
    pub fn new(policy: WarningPolicy) -> Self {
        Self {
            policy,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> WarningPolicy {
        self.policy
    }

    /// Report an unknown field. Returns true if a warning was emitted.
    pub fn unknown_attribute(&self, kind: &str, field: &str) -> bool {
        let emit = match self.policy {
            WarningPolicy::None => false,
            WarningPolicy::Always => true,
            WarningPolicy::Once => {
                let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
                seen.insert(field.to_string())
            }
        };

        if emit {
            tracing::warn!(
                kind,
                field,
                "Attempted to set unknown attribute; the server may be newer than this client"
            );
        }
        emit
    }

    /// Forget every field seen so far.
    pub fn reset(&self) {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
