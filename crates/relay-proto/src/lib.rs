//! # relay-proto
//!
//! Shared types for the Relay task runner.
//!
//! This crate provides the foundational pieces used across all Relay crates:
//! - [`AccountId`], the key separating concurrently running tasks and feeds
//! - [`Event`], the typed messages delivered to account and admin feeds
//! - The line protocol a child task uses to ask for input ([`decode_line`])

mod codec;
mod event;

pub use codec::{
    DEFAULT_ADVISORY_TIMEOUT_MS, DEFAULT_PROMPT, DecodeError, INPUT_REQUEST_SENTINEL,
    InputRequest, Line, decode_line,
};
pub use event::{Event, InputRequestEvent, LogEvent, Scope, tagged_message};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one account, usually a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
