//! # Event Registry
//!
//! An explicit observer registry keyed by event kind. Contexts use it for
//! their `message` / `error` / `exit` notifications and threads use it for
//! lock status updates.
//!
//! Every registration returns a [`ListenerHandle`] that de-registers exactly
//! that listener. `once` listeners are removed before they are invoked, so a
//! once listener runs at most one time even if the event is emitted
//! concurrently from several places.
//!
//! Emission snapshots the matching listeners and releases the registry lock
//! before calling them. Listeners may therefore register or remove listeners
//! (including themselves) on the same registry while being invoked.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

/// Default soft cap on listeners per registry before a warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// An event that can be dispatched through an [`EventRegistry`].
pub trait Event: Send + Sync + 'static {
    /// Discriminant used to route the event to listeners.
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Returns the kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// A registered callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// De-registration token returned by `on` / `once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Entry<E: Event> {
    id: u64,
    kind: E::Kind,
    once: bool,
    listener: Listener<E>,
}

/// Registry of listeners for one event source.
pub struct EventRegistry<E: Event> {
    entries: Mutex<Vec<Entry<E>>>,
    next_id: AtomicU64,
    /// Soft cap; 0 disables the warning
    max_listeners: AtomicUsize,
}

impl<E: Event> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listener_count())
            .field("max_listeners", &self.max_listeners.load(Ordering::Relaxed))
            .finish()
    }
}

impl<E: Event> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            max_listeners: AtomicUsize::new(DEFAULT_MAX_LISTENERS),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry<E>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, kind: E::Kind, once: bool, listener: Listener<E>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries();
        entries.push(Entry { id, kind, once, listener });

        let max = self.max_listeners.load(Ordering::Relaxed);
        let count = entries.iter().filter(|e| e.kind == kind).count();
        if max != 0 && count > max {
            warn!(kind = ?kind, count, max, "possible listener leak detected");
        }

        ListenerHandle(id)
    }

    /// Registers a listener invoked on every event of `kind`.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(listener))
    }

    /// Registers a listener invoked on the next event of `kind` only.
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> ListenerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(listener))
    }

    /// Removes one listener. Returns `false` if it was already gone.
    pub fn off(&self, handle: ListenerHandle) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|e| e.id != handle.0);
        entries.len() != before
    }

    /// Removes every listener of every kind.
    pub fn remove_all(&self) {
        // Drop the closures outside the lock; they may own resources whose
        // destructors touch this registry.
        let removed = std::mem::take(&mut *self.entries());
        drop(removed);
    }

    pub fn set_max_listeners(&self, max: usize) {
        self.max_listeners.store(max, Ordering::Relaxed);
    }

    pub fn listener_count(&self) -> usize {
        self.entries().len()
    }

    pub fn listener_count_for(&self, kind: E::Kind) -> usize {
        self.entries().iter().filter(|e| e.kind == kind).count()
    }

    /// Invokes every listener registered for the event's kind, in
    /// registration order. Returns how many listeners ran.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Listener<E>> = {
            let mut entries = self.entries();
            let matching = entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| Arc::clone(&e.listener))
                .collect();
            entries.retain(|e| !(e.once && e.kind == kind));
            matching
        };

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}
