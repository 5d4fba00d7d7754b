//! Line protocol spoken on a child task's output stream.
//!
//! A child asks for input by printing one line:
//!
//! ```text
//! [INPUT_REQUEST]{"prompt":"选1-3","timeout":30000,"callback":"abc123"}
//! ```
//!
//! and then reading one line from its stdin. Every other line is opaque log
//! text.

use serde::{Deserialize, Serialize};

/// Marker that introduces an input request payload.
pub const INPUT_REQUEST_SENTINEL: &str = "[INPUT_REQUEST]";

/// Prompt shown when the child omits one.
pub const DEFAULT_PROMPT: &str = "请输入：";

/// Advisory timeout assumed when the child omits one.
pub const DEFAULT_ADVISORY_TIMEOUT_MS: u64 = 30_000;

/// Errors produced while decoding a sentinel line.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The sentinel was present but nothing followed it.
    #[error("missing payload after {INPUT_REQUEST_SENTINEL}")]
    MissingPayload,

    /// The payload was not a valid request object.
    #[error("malformed input request payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Structured payload of an input request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Advisory timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Correlation id chosen by the child, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_ADVISORY_TIMEOUT_MS
}

impl InputRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            timeout: DEFAULT_ADVISORY_TIMEOUT_MS,
            callback: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// The child's correlation id, or a fresh random one when it sent none.
    pub fn resolve_callback(&self) -> String {
        self.callback
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
    }

    /// Render the line a child prints to ask for this input.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{INPUT_REQUEST_SENTINEL}{}",
            serde_json::to_string(self)?
        ))
    }
}

/// One classified line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// Plain text, already trimmed.
    Log(&'a str),
    /// A decoded input request.
    Request(InputRequest),
}

/// Classify one line of child output.
///
/// Lines without the sentinel are returned as [`Line::Log`]. A sentinel
/// followed by anything other than a request object is a [`DecodeError`];
/// callers are expected to fall back to treating the line as log text.
pub fn decode_line(line: &str) -> Result<Line<'_>, DecodeError> {
    let line = line.trim();
    let Some(start) = line.find(INPUT_REQUEST_SENTINEL) else {
        return Ok(Line::Log(line));
    };

    let payload = line[start + INPUT_REQUEST_SENTINEL.len()..].trim();
    if payload.is_empty() {
        return Err(DecodeError::MissingPayload);
    }

    let request: InputRequest = serde_json::from_str(payload)?;
    Ok(Line::Request(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_log() {
        let line = decode_line("  登录成功  ").unwrap();
        assert_eq!(line, Line::Log("登录成功"));
    }

    #[test]
    fn test_decode_full_request() {
        let line =
            decode_line(r#"[INPUT_REQUEST]{"prompt":"选1-3","timeout":30000,"callback":"abc123"}"#)
                .unwrap();
        assert_eq!(
            line,
            Line::Request(InputRequest {
                prompt: "选1-3".to_string(),
                timeout: 30000,
                callback: Some("abc123".to_string()),
            })
        );
    }

    #[test]
    fn test_sentinel_after_prefix_text() {
        let line = decode_line(r#"2024-05-01 [INPUT_REQUEST]{"prompt":"ok?"}"#).unwrap();
        let Line::Request(req) = line else {
            panic!("expected request, got {line:?}");
        };
        assert_eq!(req.prompt, "ok?");
        assert_eq!(req.timeout, DEFAULT_ADVISORY_TIMEOUT_MS);
        assert_eq!(req.callback, None);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let Line::Request(req) = decode_line("[INPUT_REQUEST]{}").unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.prompt, DEFAULT_PROMPT);
        assert_eq!(req.timeout, DEFAULT_ADVISORY_TIMEOUT_MS);
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let err = decode_line("[INPUT_REQUEST]{prompt: nope").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed input request payload"));
    }

    #[test]
    fn test_negative_timeout_is_error() {
        let err = decode_line(r#"[INPUT_REQUEST]{"prompt":"x","timeout":-5}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_sentinel_without_payload_is_error() {
        let err = decode_line("[INPUT_REQUEST]   ").unwrap_err();
        assert!(matches!(err, DecodeError::MissingPayload));
    }

    #[test]
    fn test_to_line_decodes_back() {
        let req = InputRequest::new("继续吗?")
            .with_timeout(1000)
            .with_callback("cb-1");
        let line = req.to_line().unwrap();
        assert!(line.starts_with(INPUT_REQUEST_SENTINEL));
        assert!(line.contains("继续吗?"));
        assert_eq!(decode_line(&line).unwrap(), Line::Request(req));
    }

    #[test]
    fn test_resolve_callback_keeps_child_id() {
        let req = InputRequest::new("p").with_callback("abc123");
        assert_eq!(req.resolve_callback(), "abc123");
    }

    #[test]
    fn test_resolve_callback_generates_unique_ids() {
        let req = InputRequest::new("p").with_callback("   ");
        let a = req.resolve_callback();
        let b = req.resolve_callback();
        assert!(!a.trim().is_empty());
        assert_ne!(a, b);
    }
}
