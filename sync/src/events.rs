//! Source lifecycle events and listener dispatch.
//!
//! Every source owns a [`Notifier`]. Listeners are registered per
//! [`EventKind`] and invoked in registration order. A blocking listener is
//! awaited in line and its error aborts the operation that emitted the event;
//! a non-blocking listener runs on its own task and its error is reported on
//! the notifier's error channel instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::BoxFuture;
use tether_engine::{Operation, QueryExpr, RecordBatch};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Capacity of the background error channel.
const ERROR_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeQuery,
    AfterQuery,
    BeforeUpdate,
    AfterUpdate,
}

impl EventKind {
    pub fn is_query(self) -> bool {
        matches!(self, EventKind::BeforeQuery | EventKind::AfterQuery)
    }

    pub fn is_update(self) -> bool {
        matches!(self, EventKind::BeforeUpdate | EventKind::AfterUpdate)
    }

    pub fn is_after(self) -> bool {
        matches!(self, EventKind::AfterQuery | EventKind::AfterUpdate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::BeforeQuery => "beforeQuery",
            EventKind::AfterQuery => "afterQuery",
            EventKind::BeforeUpdate => "beforeUpdate",
            EventKind::AfterUpdate => "afterUpdate",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by a source, carrying the request and, for `after*`
/// events, the normalized result.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    BeforeQuery(QueryExpr),
    AfterQuery(QueryExpr, RecordBatch),
    BeforeUpdate(Operation),
    AfterUpdate(Operation, RecordBatch),
}

impl SourceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SourceEvent::BeforeQuery(_) => EventKind::BeforeQuery,
            SourceEvent::AfterQuery(..) => EventKind::AfterQuery,
            SourceEvent::BeforeUpdate(_) => EventKind::BeforeUpdate,
            SourceEvent::AfterUpdate(..) => EventKind::AfterUpdate,
        }
    }

    pub fn query(&self) -> Option<&QueryExpr> {
        match self {
            SourceEvent::BeforeQuery(query) | SourceEvent::AfterQuery(query, _) => Some(query),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&Operation> {
        match self {
            SourceEvent::BeforeUpdate(op) | SourceEvent::AfterUpdate(op, _) => Some(op),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&RecordBatch> {
        match self {
            SourceEvent::AfterQuery(_, batch) | SourceEvent::AfterUpdate(_, batch) => Some(batch),
            _ => None,
        }
    }
}

/// An event listener. Returns a boxed future so listeners can call back
/// into other sources.
pub type Listener = Arc<dyn Fn(SourceEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// An error raised by a non-blocking listener.
#[derive(Debug, Clone)]
pub struct BackgroundError {
    /// Name of the source whose event triggered the listener
    pub source: String,
    pub event: EventKind,
    pub error: Error,
}

struct Registered {
    id: u64,
    kind: EventKind,
    blocking: bool,
    listener: Listener,
}

type Registry = Arc<Mutex<Vec<Registered>>>;

/// Per-source listener registry and dispatcher.
pub struct Notifier {
    source: String,
    listeners: Registry,
    next_id: AtomicU64,
    errors: broadcast::Sender<BackgroundError>,
}

impl Notifier {
    pub fn new(source: impl Into<String>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            source: source.into(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            errors,
        }
    }

    /// Register a listener for one event kind.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// disposed or dropped.
    pub fn subscribe(&self, kind: EventKind, blocking: bool, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered {
                id,
                kind,
                blocking,
                listener,
            });

        tracing::debug!(source = %self.source, event = %kind, blocking, "Listener registered");

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Receive errors from non-blocking listeners.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<BackgroundError> {
        self.errors.subscribe()
    }

    /// Dispatch an event to its listeners, in registration order.
    ///
    /// Returns the first blocking listener error; later listeners are not
    /// invoked once one fails.
    pub async fn emit(&self, event: SourceEvent) -> Result<()> {
        let kind = event.kind();
        let snapshot: Vec<(bool, Listener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.blocking, Arc::clone(&r.listener)))
            .collect();

        if snapshot.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            source = %self.source,
            event = %kind,
            listeners = snapshot.len(),
            "Dispatching event"
        );

        for (blocking, listener) in snapshot {
            let task = listener(event.clone());
            if blocking {
                task.await?;
                continue;
            }

            let errors = self.errors.clone();
            let source = self.source.clone();
            tokio::spawn(async move {
                if let Err(error) = task.await {
                    tracing::warn!(
                        source = %source,
                        event = %kind,
                        error = %error,
                        "Background listener failed"
                    );
                    // No receivers is fine; the failure is already logged
                    let _ = errors.send(BackgroundError {
                        source,
                        event: kind,
                        error,
                    });
                }
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("source", &self.source)
            .field(
                "listeners",
                &self
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish()
    }
}

/// Handle to a registered listener. Disposing or dropping it unregisters
/// the listener; dispatches already in flight still complete.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Vec<Registered>>>,
}

impl Subscription {
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|r| r.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Build a [`Listener`] from an async closure.
pub fn listener<F, Fut>(f: F) -> Listener
where
    F: Fn(SourceEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| -> BoxFuture<'static, Result<()>> { Box::pin(f(event)) })
}
