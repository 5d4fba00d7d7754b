//! Entry point for externally submitted answers.

use std::sync::Arc;

use crate::registry::{CorrelationRegistry, RegistryError};

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("callback id is empty")]
    EmptyCallback,

    /// The value would reach the child as more than one input line.
    #[error("submitted value must be a single line")]
    MultiLineValue,

    /// No pending request accepts a value under this id.
    #[error("unknown callback id: {0}")]
    UnknownCallback(String),
}

/// Routes submitted values to pending input requests.
#[derive(Clone)]
pub struct SubmissionGateway {
    registry: Arc<CorrelationRegistry>,
}

impl SubmissionGateway {
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }

    /// Fulfill the pending request `callback` with `value`.
    ///
    /// Refusals leave the registry unchanged.
    pub fn submit(&self, callback: &str, value: &str) -> Result<(), SubmitError> {
        let callback = callback.trim();
        if callback.is_empty() {
            return Err(SubmitError::EmptyCallback);
        }
        if value.contains(['\n', '\r']) {
            return Err(SubmitError::MultiLineValue);
        }

        match self.registry.fulfill(callback, value) {
            Ok(()) => {
                tracing::info!(%callback, "input submitted");
                Ok(())
            }
            Err(RegistryError::NotFound(id) | RegistryError::Collision(id)) => {
                tracing::debug!(callback = %id, "submission for unknown callback");
                Err(SubmitError::UnknownCallback(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WaitOutcome;
    use relay_proto::AccountId;
    use std::time::Duration;

    fn gateway() -> (Arc<CorrelationRegistry>, SubmissionGateway) {
        let registry = Arc::new(CorrelationRegistry::new());
        (Arc::clone(&registry), SubmissionGateway::new(registry))
    }

    #[tokio::test]
    async fn test_submit_delivers_value() {
        let (registry, gateway) = gateway();
        let handle = registry.register("abc123", &AccountId::from("A")).unwrap();

        gateway.submit("abc123", "2").unwrap();
        assert_eq!(
            handle.wait(Duration::from_secs(1)).await,
            WaitOutcome::Fulfilled("2".to_string())
        );
    }

    #[test]
    fn test_submit_twice_fails_second_time() {
        let (registry, gateway) = gateway();
        let _handle = registry.register("abc123", &AccountId::from("A")).unwrap();

        gateway.submit("abc123", "2").unwrap();
        assert_eq!(
            gateway.submit("abc123", "3"),
            Err(SubmitError::UnknownCallback("abc123".to_string()))
        );
    }

    #[test]
    fn test_unknown_callback() {
        let (_registry, gateway) = gateway();
        assert_eq!(
            gateway.submit("nope", "1"),
            Err(SubmitError::UnknownCallback("nope".to_string()))
        );
    }

    #[test]
    fn test_rejects_empty_callback_and_multiline_value() {
        let (registry, gateway) = gateway();
        let _handle = registry.register("abc123", &AccountId::from("A")).unwrap();

        assert_eq!(gateway.submit("  ", "1"), Err(SubmitError::EmptyCallback));
        assert_eq!(
            gateway.submit("abc123", "1\n2"),
            Err(SubmitError::MultiLineValue)
        );
        assert!(!registry.snapshot()[0].fulfilled);
    }
}
