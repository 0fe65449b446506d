// packages/engine/src/dispatch/module.rs
//! Module registration and the per-session module handle
//!
//! Modules register a name and an init function with a [`ModuleRegistry`]
//! during startup. The registry is then handed to the proxy by value and is
//! read-only from the first session on. For every new session each init
//! function receives a fresh [`ModuleContext`], through which it registers
//! packet hooks, state hooks and a shutdown callback. Once init returns the
//! context is sealed: packet hook order is computed once per session, so late
//! registrations are refused.

use crate::dispatch::engine::Dispatch;
use crate::dispatch::hook::{PacketHook, PacketMeta};
use crate::proxy::session::SessionKey;
use crate::state::{PathHookHandle, StateEvent, StateStore};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

/// Init function run once per module per session
pub type ModuleInitFn = Arc<dyn Fn(&ModuleContext) + Send + Sync>;

/// Run once when the proxy is ready, before any session exists
pub type StartFn = Arc<dyn Fn() + Send + Sync>;

/// Invoked once when a session ends: `true` on process shutdown, `false`
/// when the same identity reconnects
pub type ShutdownFn = Box<dyn FnOnce(bool) + Send>;

/// A registered module
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: Arc<str>,
    init: ModuleInitFn,
}

impl ModuleDescriptor {
    pub(crate) fn init(&self, ctx: &ModuleContext) {
        (self.init)(ctx)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Process-wide list of modules, append-only until handed to the proxy
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDescriptor>,
    on_start: Vec<StartFn>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Init functions run in registration order.
    pub fn register<F>(&mut self, name: impl Into<String>, init: F) -> &mut Self
    where
        F: Fn(&ModuleContext) + Send + Sync + 'static,
    {
        let name: String = name.into();
        if self.modules.iter().any(|m| *m.name == *name) {
            warn!("Module {} registered more than once", name);
        }
        debug!("Registered module {}", name);

        self.modules.push(ModuleDescriptor {
            name: Arc::from(name),
            init: Arc::new(init),
        });
        self
    }

    /// Register a callback run once when the proxy starts serving
    pub fn on_start<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_start.push(Arc::new(callback));
        self
    }

    pub(crate) fn start_callbacks(&self) -> &[StartFn] {
        &self.on_start
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| &*m.name).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules)
            .field("on_start", &self.on_start.len())
            .finish()
    }
}

/// Handle to a registered packet hook
#[derive(Debug, Clone)]
pub struct HookHandle {
    hook: Arc<PacketHook>,
    dispatch: Weak<Dispatch>,
}

impl HookHandle {
    pub fn target(&self) -> &str {
        self.hook.target()
    }

    pub fn priority(&self) -> i32 {
        self.hook.priority()
    }

    /// Remove the hook from its session. Removing twice logs a warning.
    pub fn unhook(&self) {
        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.remove_hook(&self.hook);
        }
    }
}

struct ContextInner {
    name: Arc<str>,
    session: SessionKey,
    dispatch: Weak<Dispatch>,
    state: StateStore,
    hooks: Mutex<Vec<Arc<PacketHook>>>,
    state_hooks: Mutex<Vec<PathHookHandle>>,
    shutdown: Mutex<Option<ShutdownFn>>,
    initialized: AtomicBool,
}

/// Capability object handed to a module for one session
///
/// Cheap to clone; modules may keep a copy for later use.
#[derive(Clone)]
pub struct ModuleContext {
    inner: Arc<ContextInner>,
}

impl ModuleContext {
    pub(crate) fn new(
        name: Arc<str>,
        session: SessionKey,
        dispatch: Weak<Dispatch>,
        state: StateStore,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name,
                session,
                dispatch,
                state,
                hooks: Mutex::new(Vec::new()),
                state_hooks: Mutex::new(Vec::new()),
                shutdown: Mutex::new(None),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn session(&self) -> &SessionKey {
        &self.inner.session
    }

    pub fn region(&self) -> &str {
        &self.inner.session.region
    }

    pub fn uid(&self) -> u64 {
        self.inner.session.uid
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Register a packet hook on `target` (an operation tag or `*`).
    ///
    /// Returns `None` once the module's init function has returned.
    pub fn hook<F>(&self, target: impl Into<String>, priority: i32, handler: F) -> Option<HookHandle>
    where
        F: Fn(&str, Bytes, &PacketMeta) -> Bytes + Send + Sync + 'static,
    {
        let hook = Arc::new(PacketHook::new(
            target,
            priority,
            Arc::clone(&self.inner.name),
            Arc::new(handler),
        ));

        if self.is_initialized() {
            warn!(
                "Failed to add hook {:?}, module {} already initialized",
                hook, self.inner.name
            );
            return None;
        }

        let Some(dispatch) = self.inner.dispatch.upgrade() else {
            warn!("Failed to add hook {:?}, session has ended", hook);
            return None;
        };

        self.inner.hooks.lock().push(Arc::clone(&hook));
        dispatch.insert_hook(Arc::clone(&hook));

        Some(HookHandle {
            hook,
            dispatch: self.inner.dispatch.clone(),
        })
    }

    /// Subscribe to changes at `path` in the session state
    pub fn state_hook(
        &self,
        path: impl Into<String>,
        listener: Sender<StateEvent>,
        want_payload: bool,
    ) -> Option<PathHookHandle> {
        let handle = self
            .inner
            .state
            .hook(path, self.inner.name.to_string(), listener, want_payload)?;
        self.inner.state_hooks.lock().push(handle.clone());
        Some(handle)
    }

    /// Set the callback run when the session ends. A second call replaces
    /// the first.
    pub fn on_shutdown<F>(&self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let previous = self.inner.shutdown.lock().replace(Box::new(callback));
        if previous.is_some() {
            warn!("Module {} replaced its shutdown callback", self.inner.name);
        }
    }

    /// The session state store. Reads block until the first snapshot.
    pub fn session_state(&self) -> &StateStore {
        &self.inner.state
    }

    /// Number of packet hooks this module has registered
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.lock().len()
    }

    pub(crate) fn seal(&self) {
        self.inner.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn take_hooks(&self) -> Vec<Arc<PacketHook>> {
        std::mem::take(&mut *self.inner.hooks.lock())
    }

    pub(crate) fn take_state_hooks(&self) -> Vec<PathHookHandle> {
        std::mem::take(&mut *self.inner.state_hooks.lock())
    }

    pub(crate) fn take_shutdown(&self) -> Option<ShutdownFn> {
        self.inner.shutdown.lock().take()
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.inner.name)
            .field("session", &self.inner.session)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        let mut registry = ModuleRegistry::new();
        registry
            .register("Packet Logger", |_| {})
            .register("Drop Logger", |_| {});

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Packet Logger", "Drop Logger"]);
    }

    #[test]
    fn test_start_callbacks_kept_in_order() {
        let mut registry = ModuleRegistry::new();
        registry.on_start(|| {}).on_start(|| {});

        assert_eq!(registry.start_callbacks().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_state_hooks_tracked() {
        let ctx = ModuleContext::new(
            Arc::from("watcher"),
            SessionKey::new("GL", 3),
            Weak::new(),
            StateStore::new(Default::default()),
        );
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let handle = ctx.state_hook("status.level", tx, false).unwrap();

        let tracked = ctx.take_state_hooks();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].path(), handle.path());
        assert_eq!(tracked[0].module(), "watcher");
        assert!(ctx.take_state_hooks().is_empty());
    }

    #[test]
    fn test_sealed_context_refuses_hooks() {
        let ctx = ModuleContext::new(
            Arc::from("late"),
            SessionKey::new("GL", 1),
            Weak::new(),
            StateStore::new(Default::default()),
        );
        ctx.seal();

        assert!(ctx.hook("*", 0, |_: &str, data: Bytes, _: &PacketMeta| data).is_none());
        assert_eq!(ctx.hook_count(), 0);
    }

    #[test]
    fn test_shutdown_taken_once() {
        let ctx = ModuleContext::new(
            Arc::from("m"),
            SessionKey::new("JP", 2),
            Weak::new(),
            StateStore::new(Default::default()),
        );
        ctx.on_shutdown(|_| {});

        assert!(ctx.take_shutdown().is_some());
        assert!(ctx.take_shutdown().is_none());
    }
}
