//! Events delivered to live feeds.
//!
//! An [`Event`] is immutable once published. The hub forwards clones of it to
//! every attached feed and keeps no history.

use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Tag used for admin copies of logs that belong to no account.
const GLOBAL_TAG: &str = "GLOBAL";

/// Which feed a subscriber is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The feed of a single account.
    Account(AccountId),
    /// The administrative feed that sees every account.
    Global,
}

impl Scope {
    pub fn account(id: impl Into<AccountId>) -> Self {
        Scope::Account(id.into())
    }
}

/// Informational text produced by a task or by the runner itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Owning account; `None` for global-only text.
    #[serde(
        rename = "accountId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub account_id: Option<AccountId>,
    pub message: String,
}

/// A child task asking a human for a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequestEvent {
    pub account_id: AccountId,
    pub prompt: String,
    /// Advisory timeout in milliseconds, as supplied by the child.
    pub timeout: u64,
    /// Correlation id the answer must be submitted against.
    pub callback: String,
}

/// Typed message published to feeds.
///
/// Serializes as `{"event": "<kind>", "data": {...}}`; the SSE layer uses
/// [`Event::kind`] and [`Event::data_json`] for the two frame fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    Log(LogEvent),
    InputRequest(InputRequestEvent),
}

impl Event {
    /// Log line scoped to an account.
    pub fn log(account_id: &AccountId, message: impl Into<String>) -> Self {
        Event::Log(LogEvent {
            account_id: Some(account_id.clone()),
            message: message.into(),
        })
    }

    /// Log line that belongs to no account.
    pub fn global_log(message: impl Into<String>) -> Self {
        Event::Log(LogEvent {
            account_id: None,
            message: message.into(),
        })
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Log(_) => "log",
            Event::InputRequest(_) => "input_request",
        }
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Event::Log(log) => log.account_id.as_ref(),
            Event::InputRequest(req) => Some(&req.account_id),
        }
    }

    /// Copy delivered to the admin feed.
    ///
    /// Log text is prefixed with the owning account (or `GLOBAL`). Input
    /// requests already carry the account id and are forwarded unchanged.
    pub fn admin_copy(&self) -> Self {
        match self {
            Event::Log(log) => Event::Log(LogEvent {
                account_id: log.account_id.clone(),
                message: tagged_message(log.account_id.as_ref(), &log.message),
            }),
            Event::InputRequest(_) => self.clone(),
        }
    }

    /// JSON body of the SSE `data:` field.
    pub fn data_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Event::Log(log) => serde_json::to_string(log),
            Event::InputRequest(req) => serde_json::to_string(req),
        }
    }
}

/// Prefix `message` with the account it belongs to, e.g. `[13800000000] done`.
pub fn tagged_message(account_id: Option<&AccountId>, message: &str) -> String {
    let tag = account_id.map_or(GLOBAL_TAG, AccountId::as_str);
    format!("[{tag}] {message}")
}
