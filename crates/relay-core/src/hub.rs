//! Event hub fanning events out to live feeds.
//!
//! Every scope (one account, or the admin view) holds a list of attached
//! subscribers. Publishing clones the event into each of them, so the number
//! of observers never changes what an individual observer receives. Nothing is
//! buffered for scopes without subscribers.

use futures::Stream;
use relay_proto::{AccountId, Event, Scope};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

/// Unique identifier for an attached feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Event>,
}

type Feeds = HashMap<Scope, Vec<Subscriber>>;

/// Hub for per-account and admin event feeds.
#[derive(Clone, Default)]
pub struct EventHub {
    feeds: Arc<Mutex<Feeds>>,
}

impl EventHub {
    /// Create a new event hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn feeds(&self) -> MutexGuard<'_, Feeds> {
        lock(&self.feeds)
    }

    /// Attach a new feed to `scope`.
    ///
    /// The feed receives every event published to the scope from now on and
    /// detaches itself when dropped.
    pub fn subscribe(&self, scope: Scope) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId::next();

        self.feeds()
            .entry(scope.clone())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(?scope, "feed attached");

        Feed {
            id,
            scope,
            rx,
            hub: Arc::downgrade(&self.feeds),
        }
    }

    /// Publish to one account's feeds, plus an admin copy to the global feeds.
    ///
    /// Both appends happen under one lock so concurrent producers for the
    /// same account cannot interleave their events.
    pub fn publish_to_account(&self, account_id: &AccountId, event: Event) {
        let admin = event.admin_copy();
        let mut feeds = self.feeds();
        deliver(&mut feeds, &Scope::Account(account_id.clone()), &event);
        deliver(&mut feeds, &Scope::Global, &admin);
    }

    /// Publish to the global feeds only.
    pub fn publish_global(&self, event: Event) {
        deliver(&mut self.feeds(), &Scope::Global, &event);
    }

    /// Publish a log line for `account_id` and mirror it to the process log.
    pub fn log(&self, account_id: &AccountId, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(account = %account_id, "{}", message);
        self.publish_to_account(account_id, Event::log(account_id, message));
    }

    /// Publish a log line that belongs to no account.
    pub fn log_global(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.publish_global(Event::global_log(message).admin_copy());
    }

    /// Number of feeds currently attached to `scope`.
    pub fn subscriber_count(&self, scope: &Scope) -> usize {
        self.feeds().get(scope).map_or(0, Vec::len)
    }
}

fn lock(feeds: &Mutex<Feeds>) -> MutexGuard<'_, Feeds> {
    feeds.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(feeds: &mut Feeds, scope: &Scope, event: &Event) {
    let Some(subscribers) = feeds.get_mut(scope) else {
        return;
    };
    // Closed receivers are pruned here; their Drop may not have run yet.
    subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
    if subscribers.is_empty() {
        feeds.remove(scope);
    }
}

/// A live, append-only stream of events for one scope.
pub struct Feed {
    id: SubscriberId,
    scope: Scope,
    rx: mpsc::UnboundedReceiver<Event>,
    hub: Weak<Mutex<Feeds>>,
}

impl Feed {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Wait for the next event. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream`; the feed detaches when the stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut feed| async move {
            feed.recv().await.map(|event| (event, feed))
        })
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        let Some(feeds) = self.hub.upgrade() else {
            return;
        };
        let mut feeds = lock(&feeds);
        if let Some(subscribers) = feeds.get_mut(&self.scope) {
            subscribers.retain(|s| s.id != self.id);
            if subscribers.is_empty() {
                feeds.remove(&self.scope);
            }
        }
        tracing::debug!(scope = ?self.scope, "feed detached");
    }
}
