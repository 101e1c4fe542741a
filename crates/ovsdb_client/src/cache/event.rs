//! Cache events and observers.

use crate::model::Model;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use ovsdb_protocol::Row;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A row as held by the cache, together with its decoded model.
#[derive(Clone)]
pub struct CachedRow {
    uuid: String,
    row: Arc<Row>,
    model: Option<Arc<dyn Any + Send + Sync>>,
}

impl CachedRow {
    pub(crate) fn new(uuid: String, row: Row, model: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Self {
            uuid,
            row: Arc::new(row),
            model,
        }
    }

    /// Row UUID.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Full cached row, restricted to the monitored columns.
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Shared handle to the row.
    pub fn shared_row(&self) -> Arc<Row> {
        Arc::clone(&self.row)
    }

    /// Returns an owned copy of the decoded model.
    ///
    /// `None` if the table has no model of type `M`.
    pub fn model<M: Model>(&self) -> Option<M> {
        self.model
            .as_ref()
            .and_then(|model| model.as_ref().downcast_ref::<M>())
            .cloned()
    }
}

impl fmt::Debug for CachedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRow")
            .field("uuid", &self.uuid)
            .field("row", &self.row)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

/// Kind of a cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A row appeared.
    Add,
    /// A row changed.
    Update,
    /// A row disappeared.
    Delete,
}

/// A change to the cache.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A row appeared.
    Add {
        /// Table name.
        table: String,
        /// New row.
        row: CachedRow,
    },
    /// A row changed.
    Update {
        /// Table name.
        table: String,
        /// Row before the change.
        old: CachedRow,
        /// Row after the change.
        new: CachedRow,
    },
    /// A row disappeared.
    Delete {
        /// Table name.
        table: String,
        /// Last known row.
        row: CachedRow,
    },
}

impl CacheEvent {
    /// Event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Add { .. } => EventKind::Add,
            CacheEvent::Update { .. } => EventKind::Update,
            CacheEvent::Delete { .. } => EventKind::Delete,
        }
    }

    /// Table the event belongs to.
    pub fn table(&self) -> &str {
        match self {
            CacheEvent::Add { table, .. }
            | CacheEvent::Update { table, .. }
            | CacheEvent::Delete { table, .. } => table,
        }
    }

    /// UUID of the affected row.
    pub fn uuid(&self) -> &str {
        match self {
            CacheEvent::Add { row, .. } | CacheEvent::Delete { row, .. } => row.uuid(),
            CacheEvent::Update { new, .. } => new.uuid(),
        }
    }
}

/// Synchronous cache observer.
///
/// Called on the thread applying updates, after the cache lock is released.
/// Every method has an empty default body.
pub trait EventHandler: Send + Sync {
    /// A row was added.
    fn on_add(&self, _table: &str, _row: &CachedRow) {}

    /// A row changed.
    fn on_update(&self, _table: &str, _old: &CachedRow, _new: &CachedRow) {}

    /// A row was deleted.
    fn on_delete(&self, _table: &str, _row: &CachedRow) {}
}

type AddFn = Box<dyn Fn(&str, &CachedRow) + Send + Sync>;
type UpdateFn = Box<dyn Fn(&str, &CachedRow, &CachedRow) + Send + Sync>;

/// An [`EventHandler`] assembled from closures.
///
/// ```
/// use ovsdb_client::EventHandlerFns;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let adds = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&adds);
/// let handler = EventHandlerFns::new().on_add(move |_, _| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// # let _ = handler;
/// ```
#[derive(Default)]
pub struct EventHandlerFns {
    add: Option<AddFn>,
    update: Option<UpdateFn>,
    delete: Option<AddFn>,
}

impl EventHandlerFns {
    /// Creates a handler that ignores every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the add callback.
    pub fn on_add(mut self, f: impl Fn(&str, &CachedRow) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    /// Sets the update callback.
    pub fn on_update(
        mut self,
        f: impl Fn(&str, &CachedRow, &CachedRow) + Send + Sync + 'static,
    ) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    /// Sets the delete callback.
    pub fn on_delete(mut self, f: impl Fn(&str, &CachedRow) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl EventHandler for EventHandlerFns {
    fn on_add(&self, table: &str, row: &CachedRow) {
        if let Some(f) = &self.add {
            f(table, row);
        }
    }

    fn on_update(&self, table: &str, old: &CachedRow, new: &CachedRow) {
        if let Some(f) = &self.update {
            f(table, old, new);
        }
    }

    fn on_delete(&self, table: &str, row: &CachedRow) {
        if let Some(f) = &self.delete {
            f(table, row);
        }
    }
}

impl fmt::Debug for EventHandlerFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerFns")
            .field("add", &self.add.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

pub(crate) fn notify(handler: &dyn EventHandler, event: &CacheEvent) {
    match event {
        CacheEvent::Add { table, row } => handler.on_add(table, row),
        CacheEvent::Update { table, old, new } => handler.on_update(table, old, new),
        CacheEvent::Delete { table, row } => handler.on_delete(table, row),
    }
}

/// Sending half of an asynchronous subscription.
///
/// Never blocks: when the queue is full the newest event is dropped and
/// counted.
#[derive(Debug)]
pub(crate) struct Subscriber {
    tx: Sender<CacheEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    /// Returns false once the receiving side is gone.
    pub(crate) fn offer(&self, event: &CacheEvent) -> bool {
        match self.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Receiving half of an asynchronous subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<CacheEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub(crate) fn bounded(capacity: usize) -> (Subscriber, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Subscriber {
                tx,
                dropped: Arc::clone(&dropped),
            },
            Self { rx, dropped },
        )
    }

    /// Blocks until the next event. `None` once the cache is gone.
    pub fn recv(&self) -> Option<CacheEvent> {
        self.rx.recv().ok()
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&self) -> Option<CacheEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CacheEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains every queued event.
    pub fn drain(&self) -> Vec<CacheEvent> {
        self.rx.try_iter().collect()
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::Value;
    use std::sync::Mutex;

    fn row(uuid: &str) -> CachedRow {
        CachedRow::new(
            uuid.to_string(),
            Row::new().with("_uuid", Value::uuid(uuid)),
            None,
        )
    }

    #[test]
    fn event_accessors() {
        let event = CacheEvent::Update {
            table: "Bridge".into(),
            old: row("a"),
            new: row("a"),
        };
        assert_eq!(event.kind(), EventKind::Update);
        assert_eq!(event.table(), "Bridge");
        assert_eq!(event.uuid(), "a");
    }

    #[test]
    fn closures_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, d) = (Arc::clone(&seen), Arc::clone(&seen));
        let handler = EventHandlerFns::new()
            .on_add(move |t, r| a.lock().unwrap().push(format!("add {t} {}", r.uuid())))
            .on_delete(move |t, r| d.lock().unwrap().push(format!("del {t} {}", r.uuid())));

        notify(&handler, &CacheEvent::Delete { table: "T".into(), row: row("x") });
        notify(&handler, &CacheEvent::Add { table: "T".into(), row: row("y") });
        notify(
            &handler,
            &CacheEvent::Update { table: "T".into(), old: row("y"), new: row("y") },
        );

        assert_eq!(*seen.lock().unwrap(), vec!["del T x", "add T y"]);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (subscriber, subscription) = Subscription::bounded(2);
        for uuid in ["a", "b", "c"] {
            assert!(subscriber.offer(&CacheEvent::Add { table: "T".into(), row: row(uuid) }));
        }
        assert_eq!(subscription.dropped(), 1);
        let uuids: Vec<_> = subscription
            .drain()
            .iter()
            .map(|e| e.uuid().to_string())
            .collect();
        assert_eq!(uuids, vec!["a", "b"]);
    }

    #[test]
    fn closed_subscription_is_reported() {
        let (subscriber, subscription) = Subscription::bounded(1);
        drop(subscription);
        assert!(!subscriber.offer(&CacheEvent::Add { table: "T".into(), row: row("a") }));
    }
}
