// packages/engine/src/state/path_hook.rs
//! Path hooks: subscriptions to individual field paths of the mirror
//!
//! Hooks are keyed by exact path string. There is no prefix or wildcard
//! matching. Delivery never blocks the merge: a listener whose channel is
//! full loses that event, and a hook whose listener has gone away is removed.

use crate::state::document::{resolve, walk_paths};
use crate::state::store::StoreShared;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

/// Notification delivered to a path hook's listener
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    /// Path that changed
    pub path: String,

    /// New value at `path`, present only if the hook asked for it
    pub payload: Option<Value>,
}

/// A single subscription
#[derive(Debug)]
pub(crate) struct PathHook {
    pub(crate) path: String,
    pub(crate) module: String,
    listener: Sender<StateEvent>,
    want_payload: bool,
    active: AtomicBool,
}

impl PathHook {
    pub(crate) fn new(
        path: String,
        module: String,
        listener: Sender<StateEvent>,
        want_payload: bool,
    ) -> Self {
        Self {
            path,
            module,
            listener,
            want_payload,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Handle returned to the subscriber, used to unhook
///
/// Holds only a weak reference to the store, so a handle outliving its
/// session is harmless.
#[derive(Debug, Clone)]
pub struct PathHookHandle {
    pub(crate) hook: Arc<PathHook>,
    pub(crate) store: Weak<StoreShared>,
}

impl PathHookHandle {
    pub fn path(&self) -> &str {
        &self.hook.path
    }

    pub fn module(&self) -> &str {
        &self.hook.module
    }

    /// Remove the subscription. Unhooking twice is a no-op.
    pub fn unhook(&self) {
        match self.store.upgrade() {
            Some(store) => store.remove_path_hook(&self.hook),
            None => self.hook.deactivate(),
        }
    }
}

/// Outcome of one notification pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyStats {
    pub delivered: u64,

    /// Events lost to a full listener
    pub dropped: u64,

    /// Hooks removed because their listener was closed
    pub closed: u64,
}

/// Active path hooks, keyed by exact path
#[derive(Debug, Default)]
pub(crate) struct PathRegistry {
    hooks: HashMap<String, Vec<Arc<PathHook>>>,
}

impl PathRegistry {
    pub(crate) fn install(&mut self, hook: Arc<PathHook>) {
        // Unhooked while still queued
        if !hook.is_active() {
            return;
        }
        self.hooks.entry(hook.path.clone()).or_default().push(hook);
    }

    /// Remove by identity. Returns false if the hook was not installed.
    pub(crate) fn remove(&mut self, hook: &Arc<PathHook>) -> bool {
        let Some(hooks) = self.hooks.get_mut(&hook.path) else {
            return false;
        };

        let before = hooks.len();
        hooks.retain(|h| !Arc::ptr_eq(h, hook));
        let removed = hooks.len() != before;

        if hooks.is_empty() {
            self.hooks.remove(&hook.path);
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Walk `delta` and notify every hook registered on a visited path.
    ///
    /// Payloads are read from `mirror`, which must already contain `delta`.
    /// Hooks with a closed listener are removed once the walk is done.
    pub(crate) fn notify(&mut self, delta: &Value, mirror: &Value) -> NotifyStats {
        let mut stats = NotifyStats::default();
        if self.hooks.is_empty() {
            return stats;
        }

        let mut closed = Vec::new();

        walk_paths(delta, &mut |path| {
            let Some(hooks) = self.hooks.get(path) else {
                return;
            };

            for hook in hooks {
                let payload = if hook.want_payload {
                    resolve(mirror, path).cloned()
                } else {
                    None
                };
                let event = StateEvent {
                    path: path.to_string(),
                    payload,
                };

                match hook.listener.try_send(event) {
                    Ok(()) => stats.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        stats.dropped += 1;
                        warn!(
                            "State event for {} dropped, listener of {} is full",
                            path, hook.module
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(
                            "Listener of {} on {} is closed, removing hook",
                            hook.module, path
                        );
                        closed.push(Arc::clone(hook));
                    }
                }
            }
        });

        for hook in closed {
            hook.deactivate();
            if self.remove(&hook) {
                stats.closed += 1;
            }
        }
        stats
    }
}
