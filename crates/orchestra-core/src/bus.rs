//! In-process publish/subscribe for orchestration events
//!
//! Handlers are registered either for one [`EventKind`] or for every event
//! (catch-all). Publishing awaits kind-specific handlers first, then catch-all
//! handlers, each group in registration order. A failing or panicking handler
//! is logged and skipped; it never reaches the publisher.
//!
//! Publication iterates a snapshot of the handler lists, so subscribing or
//! unsubscribing from inside a handler (or from another task) is safe. Once
//! [`Subscription::unsubscribe`] returns, the handler is not invoked again,
//! although a call already in progress runs to completion.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::events::{EventKind, OrchestraEvent};

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OrchestraEvent) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(OrchestraEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &OrchestraEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(OrchestraEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Forwards every event into an unbounded channel.
struct ChannelHandler {
    tx: mpsc::UnboundedSender<OrchestraEvent>,
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: &OrchestraEvent) -> anyhow::Result<()> {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[derive(Clone)]
struct HandlerEntry {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    by_kind: RwLock<HashMap<EventKind, Vec<HandlerEntry>>>,
    catch_all: RwLock<Vec<HandlerEntry>>,
    failures: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64, kind: Option<EventKind>) -> bool {
        match kind {
            Some(kind) => {
                let mut by_kind = self
                    .by_kind
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                by_kind
                    .get_mut(&kind)
                    .map(|entries| take_entry(entries, id))
                    .unwrap_or(false)
            }
            None => {
                let mut catch_all = self
                    .catch_all
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                take_entry(&mut catch_all, id)
            }
        }
    }
}

fn take_entry(entries: &mut Vec<HandlerEntry>, id: u64) -> bool {
    match entries.iter().position(|entry| entry.id == id) {
        Some(position) => {
            let entry = entries.remove(position);
            entry.active.store(false, Ordering::SeqCst);
            true
        }
        None => false,
    }
}

/// Handle returned by every subscribe call
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: Option<EventKind>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Deregisters the handler. Returns `false` if it was already removed or the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id, self.kind),
            None => false,
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.kind
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner::default()),
        }
    }

    /// Registers a handler for a single event kind.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Subscription {
        let entry = self.entry(handler);
        let id = entry.id;

        self.inner
            .by_kind
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_default()
            .push(entry);

        Subscription {
            id,
            kind: Some(kind),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Registers a handler invoked for every event, after the kind-specific ones.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> Subscription {
        let entry = self.entry(handler);
        let id = entry.id;

        self.inner
            .catch_all
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);

        Subscription {
            id,
            kind: None,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Catch-all subscription that delivers events through a dedicated channel.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<OrchestraEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe_all(Arc::new(ChannelHandler { tx }));
        (subscription, rx)
    }

    pub async fn publish(&self, event: OrchestraEvent) {
        let kind = event.kind();

        for entry in self.snapshot(kind) {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }

            match AssertUnwindSafe(entry.handler.handle(&event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.inner.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[{}] Event handler {} failed on {}: {}",
                        event.task_id,
                        entry.id,
                        kind,
                        error
                    );
                }
                Err(_) => {
                    self.inner.failures.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "[{}] Event handler {} panicked on {}",
                        event.task_id,
                        entry.id,
                        kind
                    );
                }
            }
        }
    }

    /// Number of handlers that would see an event of `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.snapshot(kind).len()
    }

    /// Handler failures (errors and panics) since the bus was created.
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    fn entry(&self, handler: Arc<dyn EventHandler>) -> HandlerEntry {
        HandlerEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            active: Arc::new(AtomicBool::new(true)),
            handler,
        }
    }

    fn snapshot(&self, kind: EventKind) -> Vec<HandlerEntry> {
        let mut handlers: Vec<HandlerEntry> = self
            .inner
            .by_kind
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        handlers.extend(
            self.inner
                .catch_all
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .iter()
                .cloned(),
        );

        handlers
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
