//! Correlation registry for outstanding input requests.
//!
//! Each entry is keyed by its callback id and owns the sending half of a
//! oneshot channel. The runner that registered the entry holds the receiving
//! half in a [`PendingHandle`] and is the only party that removes the entry.
//! Fulfillment takes the sender out of the slot, so at most one value is
//! ever delivered per id even while the entry is still present.

use chrono::{DateTime, Utc};
use relay_proto::AccountId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another request with this id is still pending.
    #[error("callback id already pending: {0}")]
    Collision(String),

    /// No pending request accepts a value under this id.
    #[error("no pending request for callback id: {0}")]
    NotFound(String),
}

/// How a wait on a [`PendingHandle`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A value was submitted before the bound elapsed.
    Fulfilled(String),
    /// The bound elapsed first.
    TimedOut,
    /// The entry was dropped without a value (see [`CorrelationRegistry::cancel_all`]).
    Cancelled,
}

/// Admin view of one pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub callback: String,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
    /// A value has been delivered but the owner has not removed the entry yet.
    pub fulfilled: bool,
}

struct PendingEntry {
    account_id: AccountId,
    created_at: DateTime<Utc>,
    slot: Option<oneshot::Sender<String>>,
}

/// Waiting half of a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    callback: String,
    rx: oneshot::Receiver<String>,
}

impl PendingHandle {
    pub fn callback(&self) -> &str {
        &self.callback
    }

    /// Suspend until the request is fulfilled or `bound` elapses.
    ///
    /// Does not remove the entry; the owner calls
    /// [`CorrelationRegistry::remove`] afterwards on every branch.
    pub async fn wait(self, bound: Duration) -> WaitOutcome {
        match tokio::time::timeout(bound, self.rx).await {
            Ok(Ok(value)) => WaitOutcome::Fulfilled(value),
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}

/// Thread-safe map of callback id to pending request.
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a pending entry for `callback` owned by `account_id`.
    pub fn register(
        &self,
        callback: &str,
        account_id: &AccountId,
    ) -> Result<PendingHandle, RegistryError> {
        let mut entries = self.entries();
        if entries.contains_key(callback) {
            return Err(RegistryError::Collision(callback.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(
            callback.to_string(),
            PendingEntry {
                account_id: account_id.clone(),
                created_at: Utc::now(),
                slot: Some(tx),
            },
        );
        tracing::debug!(%callback, account = %account_id, "registered input request");

        Ok(PendingHandle {
            callback: callback.to_string(),
            rx,
        })
    }

    /// Deliver `value` to the waiter of `callback`.
    ///
    /// Fails with [`RegistryError::NotFound`] and changes nothing when the id
    /// was never registered, was already fulfilled, or was removed.
    pub fn fulfill(&self, callback: &str, value: impl Into<String>) -> Result<(), RegistryError> {
        let mut entries = self.entries();
        let sender = entries
            .get_mut(callback)
            .and_then(|entry| entry.slot.take())
            .ok_or_else(|| RegistryError::NotFound(callback.to_string()))?;

        // A dropped receiver means the owner already stopped waiting.
        sender
            .send(value.into())
            .map_err(|_| RegistryError::NotFound(callback.to_string()))
    }

    /// Delete the entry for `callback`, whatever its state.
    pub fn remove(&self, callback: &str) -> bool {
        self.entries().remove(callback).is_some()
    }

    /// Remove every entry owned by `account_id`, releasing their waiters
    /// with [`WaitOutcome::Cancelled`]. Returns the number removed.
    pub fn cancel_all(&self, account_id: &AccountId) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| &entry.account_id != account_id);
        before - entries.len()
    }

    pub fn contains(&self, callback: &str) -> bool {
        self.entries().contains_key(callback)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Callback ids currently owned by `account_id`.
    pub fn pending_for(&self, account_id: &AccountId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| &entry.account_id == account_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<PendingSummary> {
        let mut items: Vec<PendingSummary> = self
            .entries()
            .iter()
            .map(|(id, entry)| PendingSummary {
                callback: id.clone(),
                account_id: entry.account_id.clone(),
                created_at: entry.created_at,
                fulfilled: entry.slot.is_none(),
            })
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn account(id: &str) -> AccountId {
        AccountId::from(id)
    }

    #[tokio::test]
    async fn test_fulfill_before_bound_returns_value() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("abc123", &account("A")).unwrap();

        registry.fulfill("abc123", "2").unwrap();

        let outcome = handle.wait(Duration::from_secs(15)).await;
        assert_eq!(outcome, WaitOutcome::Fulfilled("2".to_string()));
        assert!(registry.contains("abc123"));
        assert!(registry.remove("abc123"));
        assert!(!registry.contains("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_fulfill() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("abc123", &account("A")).unwrap();

        let outcome = handle.wait(Duration::from_secs(15)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        registry.remove("abc123");
        assert_eq!(
            registry.fulfill("abc123", "late"),
            Err(RegistryError::NotFound("abc123".to_string()))
        );
    }

    #[test]
    fn test_duplicate_register_is_collision() {
        let registry = CorrelationRegistry::new();
        let _handle = registry.register("dup", &account("A")).unwrap();

        let err = registry.register("dup", &account("B")).unwrap_err();
        assert_eq!(err, RegistryError::Collision("dup".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pending_for(&account("A")), vec!["dup".to_string()]);
    }

    #[test]
    fn test_fulfill_unknown_id_changes_nothing() {
        let registry = CorrelationRegistry::new();
        let _handle = registry.register("known", &account("A")).unwrap();

        assert_eq!(
            registry.fulfill("unknown", "x"),
            Err(RegistryError::NotFound("unknown".to_string()))
        );
        assert_eq!(registry.len(), 1);
        assert!(!registry.snapshot()[0].fulfilled);
    }

    #[tokio::test]
    async fn test_second_fulfill_fails_before_removal() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("once", &account("A")).unwrap();

        registry.fulfill("once", "first").unwrap();
        assert_eq!(
            registry.fulfill("once", "second"),
            Err(RegistryError::NotFound("once".to_string()))
        );
        assert!(registry.snapshot()[0].fulfilled);

        let outcome = handle.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, WaitOutcome::Fulfilled("first".to_string()));
    }

    #[tokio::test]
    async fn test_fulfill_after_owner_stopped_waiting() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("gone", &account("A")).unwrap();
        drop(handle);

        assert!(registry.fulfill("gone", "x").is_err());
    }

    #[tokio::test]
    async fn test_ids_resolve_independently() {
        let registry = Arc::new(CorrelationRegistry::new());
        let h1 = registry.register("id1", &account("A")).unwrap();
        let h2 = registry.register("id2", &account("B")).unwrap();

        let first = tokio::spawn(async move { h1.wait(Duration::from_secs(5)).await });

        registry.fulfill("id2", "two").unwrap();
        assert_eq!(
            h2.wait(Duration::from_secs(5)).await,
            WaitOutcome::Fulfilled("two".to_string())
        );
        assert!(!first.is_finished());

        registry.fulfill("id1", "one").unwrap();
        assert_eq!(
            first.await.unwrap(),
            WaitOutcome::Fulfilled("one".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancel_all_releases_only_owned_entries() {
        let registry = CorrelationRegistry::new();
        let a1 = registry.register("a1", &account("A")).unwrap();
        let _a2 = registry.register("a2", &account("A")).unwrap();
        let _b1 = registry.register("b1", &account("B")).unwrap();

        assert_eq!(registry.cancel_all(&account("A")), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("b1"));
        assert_eq!(a1.wait(Duration::from_secs(1)).await, WaitOutcome::Cancelled);
        assert!(registry.fulfill("a2", "x").is_err());
    }

    #[test]
    fn test_snapshot_lists_entries() {
        let registry = CorrelationRegistry::new();
        let _h = registry.register("s1", &account("A")).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].callback, "s1");
        assert_eq!(snapshot[0].account_id, account("A"));
    }
}
