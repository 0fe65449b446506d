// packages/engine/src/state/store.rs
//! Session state store
//!
//! Owns the mirror of server-authoritative session state for one session.
//! The mirror starts empty and unloaded; the first full snapshot replaces it
//! wholesale and marks it loaded, and every later packet carrying a delta is
//! override-merged into it.
//!
//! # Consistency
//!
//! ```text
//! ingest(delta) ──lock──► fold queued path hooks ─► merge ─► notify ──unlock
//!                                                                   │
//! get / barrier / with_state ──lock (waits for in-flight ingest)────┘
//! ```
//!
//! Merge and notification happen inside one critical section, so readers
//! never observe a half-merged mirror and a freshly registered path hook
//! either sees a whole delta or none of it. `barrier` is read-after-write,
//! not linearizable: a delta that arrives concurrently may still be applied
//! before it returns.

use crate::state::document::{override_merge, resolve};
use crate::state::path_hook::{PathHook, PathHookHandle, PathRegistry, StateEvent};
use crate::utils::config::StateConfig;
use crate::utils::errors::{EngineError, Result};
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

/// Mutable state guarded by the store lock
#[derive(Debug)]
struct StoreInner {
    mirror: Value,
    loaded: bool,
    registry: PathRegistry,
}

/// Shared between the store and outstanding path hook handles
#[derive(Debug)]
pub(crate) struct StoreShared {
    config: StateConfig,
    inner: Mutex<StoreInner>,
    loaded_cv: Condvar,

    /// Registrations waiting to be folded into the registry
    hook_queue: ArrayQueue<Arc<PathHook>>,

    /// Events dropped because a listener was full
    dropped_events: AtomicU64,
}

impl StoreShared {
    /// Caller holds the lock
    fn fold_hook_queue(&self, inner: &mut StoreInner) {
        while let Some(hook) = self.hook_queue.pop() {
            debug!("Installing state hook {} for {}", hook.path, hook.module);
            inner.registry.install(hook);
        }
    }

    pub(crate) fn remove_path_hook(&self, hook: &Arc<PathHook>) {
        let mut inner = self.inner.lock();
        hook.deactivate();
        if inner.registry.remove(hook) {
            debug!("Removed state hook {} for {}", hook.path, hook.module);
        }
    }
}

/// Handle to one session's state store. Cloning shares the same mirror.
#[derive(Debug, Clone)]
pub struct StateStore {
    shared: Arc<StoreShared>,
}

impl StateStore {
    /// Create an unloaded store
    pub fn new(config: StateConfig) -> Self {
        let hook_queue = ArrayQueue::new(config.hook_queue_capacity.max(1));

        Self {
            shared: Arc::new(StoreShared {
                config,
                inner: Mutex::new(StoreInner {
                    mirror: Value::Null,
                    loaded: false,
                    registry: PathRegistry::default(),
                }),
                loaded_cv: Condvar::new(),
                hook_queue,
                dropped_events: AtomicU64::new(0),
            }),
        }
    }

    /// Feed one packet into the store. Never mutates the payload.
    pub fn ingest(&self, op: &str, payload: &[u8]) {
        if op == self.shared.config.snapshot_op {
            self.ingest_snapshot(op, payload);
        } else if self.is_loaded() {
            self.ingest_delta(op, payload);
        }
    }

    fn ingest_snapshot(&self, op: &str, payload: &[u8]) {
        let start = Instant::now();
        let document = match extract(payload, &self.shared.config.snapshot_key) {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(
                    "{} carries no '{}' document, snapshot skipped",
                    op, self.shared.config.snapshot_key
                );
                return;
            }
            Err(e) => {
                warn!("{}: {}, snapshot skipped", op, e);
                return;
            }
        };

        let mut inner = self.shared.inner.lock();
        self.shared.fold_hook_queue(&mut inner);
        inner.mirror = document;
        let first = !inner.loaded;
        inner.loaded = true;
        drop(inner);

        if first {
            self.shared.loaded_cv.notify_all();
            info!("Session state loaded in {}ms", start.elapsed().as_millis());
        } else {
            info!("Session state resynchronised from {}", op);
        }
    }

    fn ingest_delta(&self, op: &str, payload: &[u8]) {
        // Bodiless legs carry no delta
        if payload.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        let delta = match extract(payload, &self.shared.config.delta_key) {
            Ok(Some(delta)) => delta,
            Ok(None) => return,
            Err(e) => {
                debug!("{}: {}, delta skipped", op, e);
                return;
            }
        };

        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        self.shared.fold_hook_queue(inner);
        override_merge(&mut inner.mirror, &delta);

        let stats = inner.registry.notify(&delta, &inner.mirror);
        if stats.dropped > 0 {
            self.shared
                .dropped_events
                .fetch_add(stats.dropped, Ordering::Relaxed);
            metrics::counter!("gatehook_state_events_dropped_total").increment(stats.dropped);
        }
        debug!(
            "{} merged, {} state events delivered, {} dropped, {} hooks closed",
            op, stats.delivered, stats.dropped, stats.closed
        );
    }

    /// Whether the first snapshot has been ingested
    pub fn is_loaded(&self) -> bool {
        self.shared.inner.lock().loaded
    }

    /// Lock the store, waiting for the first snapshot if necessary
    fn lock_loaded(&self) -> MutexGuard<'_, StoreInner> {
        let mut inner = self.shared.inner.lock();
        while !inner.loaded {
            self.shared.loaded_cv.wait(&mut inner);
        }
        inner
    }

    /// Resolve a dot-delimited path. Blocks until the store is loaded.
    pub fn get(&self, path: &str) -> Result<Value> {
        let inner = self.lock_loaded();
        resolve(&inner.mirror, path)
            .cloned()
            .ok_or_else(|| EngineError::not_found(path))
    }

    /// Run `f` against the mirror. Blocks until the store is loaded.
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let inner = self.lock_loaded();
        f(&inner.mirror)
    }

    /// Clone of the whole mirror. Blocks until the store is loaded.
    pub fn snapshot(&self) -> Value {
        self.with_state(Value::clone)
    }

    /// Wait for any in-flight ingest to finish
    pub fn barrier(&self) {
        drop(self.shared.inner.lock());
    }

    /// Subscribe `listener` to changes at `path`.
    ///
    /// The hook is installed at the start of the next ingest and observes
    /// every delta from then on. Returns `None` if the registration queue is
    /// full.
    pub fn hook(
        &self,
        path: impl Into<String>,
        module: impl Into<String>,
        listener: Sender<StateEvent>,
        want_payload: bool,
    ) -> Option<PathHookHandle> {
        let hook = Arc::new(PathHook::new(path.into(), module.into(), listener, want_payload));

        if let Err(hook) = self.shared.hook_queue.push(Arc::clone(&hook)) {
            warn!(
                "Failed to queue state hook {} for {}, registration queue full",
                hook.path, hook.module
            );
            return None;
        }

        Some(PathHookHandle {
            hook,
            store: Arc::downgrade(&self.shared),
        })
    }

    /// Number of installed path hooks (queued registrations excluded)
    pub fn hook_count(&self) -> usize {
        self.shared.inner.lock().registry.len()
    }

    /// Total state events dropped on full listeners
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }
}

/// Parse `payload` and pull the document at `key` out of it
fn extract(payload: &[u8], key: &str) -> Result<Option<Value>> {
    let mut root: Value = serde_json::from_slice(payload)
        .map_err(|e| EngineError::MalformedPayload(e.to_string()))?;

    let pointer = format!("/{}", key.replace('.', "/"));
    Ok(root.pointer_mut(&pointer).map(Value::take))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SNAPSHOT_OP: &str = "S/account/syncData";

    fn store() -> StateStore {
        StateStore::new(StateConfig::default())
    }

    fn loaded_store(user: Value) -> StateStore {
        let store = store();
        store.ingest(SNAPSHOT_OP, json!({"user": user, "ts": 1}).to_string().as_bytes());
        store
    }

    fn delta(modified: Value) -> Vec<u8> {
        json!({"playerDataDelta": {"modified": modified, "deleted": {}}})
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_get_after_snapshot() {
        let store = loaded_store(json!({"a": {"b": {"c": 5}}}));

        assert!(store.is_loaded());
        assert_eq!(store.get("a.b.c").unwrap(), json!(5));
        assert!(matches!(store.get("a.b.x"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_delta_before_snapshot_ignored() {
        let store = store();
        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 9}})));
        assert!(!store.is_loaded());

        store.ingest(SNAPSHOT_OP, &json!({"user": {"status": {"level": 1}}}).to_string().into_bytes());
        assert_eq!(store.get("status.level").unwrap(), json!(1));
    }

    #[test]
    fn test_deltas_apply_in_order() {
        let store = loaded_store(json!({"status": {"level": 1, "exp": 0}}));
        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 2}})));
        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 3, "exp": 10}})));

        assert_eq!(store.snapshot(), json!({"status": {"level": 3, "exp": 10}}));
    }

    #[test]
    fn test_malformed_payload_keeps_state() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        store.ingest("S/quest/battleFinish", b"{not json");
        store.ingest(SNAPSHOT_OP, b"\x00\x01");

        assert_eq!(store.get("status.level").unwrap(), json!(1));
    }

    #[test]
    fn test_path_hook_notified_once() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = store.hook("status.level", "test", tx, true).unwrap();

        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 2}})));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.path, "status.level");
        assert_eq!(event.payload, Some(json!(2)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_path_hook_without_payload() {
        let store = loaded_store(json!({}));
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = store.hook("inventory", "test", tx, false).unwrap();

        store.ingest("S/shop/buy", &delta(json!({"inventory": {"4001": 100}})));

        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent { path: "inventory".to_string(), payload: None }
        );
    }

    #[test]
    fn test_unhook_before_delta() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        let (tx, mut rx) = mpsc::channel(4);
        let handle = store.hook("status.level", "test", tx, false).unwrap();

        handle.unhook();
        handle.unhook();
        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 2}})));

        assert!(rx.try_recv().is_err());
        assert_eq!(store.hook_count(), 0);
    }

    #[test]
    fn test_unhook_after_install() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        let (tx, mut rx) = mpsc::channel(4);
        let handle = store.hook("status.level", "test", tx, false).unwrap();

        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 2}})));
        assert!(rx.try_recv().is_ok());
        assert_eq!(store.hook_count(), 1);

        handle.unhook();
        store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 3}})));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.hook_count(), 0);
    }

    #[test]
    fn test_saturated_listener_counted() {
        let store = loaded_store(json!({}));
        let (tx, _rx) = mpsc::channel(1);
        let _handle = store.hook("gold", "test", tx, false).unwrap();

        store.ingest("S/a", &delta(json!({"gold": 1})));
        store.ingest("S/b", &delta(json!({"gold": 2})));

        assert_eq!(store.dropped_events(), 1);
        assert_eq!(store.get("gold").unwrap(), json!(2));
    }

    #[test]
    fn test_closed_listener_not_counted_as_drop() {
        let store = loaded_store(json!({}));
        let (tx, rx) = mpsc::channel(1);
        let _handle = store.hook("gold", "test", tx, false).unwrap();
        drop(rx);

        for gold in 0..5 {
            store.ingest("S/shop/buy", &delta(json!({"gold": gold})));
        }

        assert_eq!(store.hook_count(), 0);
        assert_eq!(store.dropped_events(), 0);
        assert_eq!(store.get("gold").unwrap(), json!(4));
    }

    #[test]
    fn test_bodiless_and_foreign_legs_ignored() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        store.ingest("C/quest/battleStart", b"");
        store.ingest("S/online/v1/ping", b"  \n");
        store.ingest("S/assetbundle/official", b"<html></html>");
        store.ingest("S/quest/list", b"[1, 2, 3]");

        assert_eq!(store.snapshot(), json!({"status": {"level": 1}}));
    }

    #[test]
    fn test_registration_queue_full() {
        let store = StateStore::new(StateConfig {
            hook_queue_capacity: 1,
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(1);

        assert!(store.hook("a", "test", tx.clone(), false).is_some());
        assert!(store.hook("b", "test", tx, false).is_none());
    }

    #[test]
    fn test_barrier_sees_concurrent_ingest() {
        let store = loaded_store(json!({"status": {"level": 1}}));
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                store.ingest("S/quest/battleFinish", &delta(json!({"status": {"level": 5}})));
            })
        };
        writer.join().unwrap();

        store.barrier();
        assert_eq!(store.with_state(|doc| doc["status"]["level"].clone()), json!(5));

        // Never waits for a snapshot
        StateStore::new(StateConfig::default()).barrier();
    }

    #[test]
    fn test_get_blocks_until_loaded() {
        let store = store();
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || store.get("status.level"))
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        store.ingest(SNAPSHOT_OP, &json!({"user": {"status": {"level": 7}}}).to_string().into_bytes());
        assert_eq!(reader.join().unwrap().unwrap(), json!(7));
    }
}
