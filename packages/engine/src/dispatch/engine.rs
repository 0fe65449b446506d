// packages/engine/src/dispatch/engine.rs
//! Per-session dispatch engine
//!
//! Every decoded packet of a session passes through here:
//!
//! ```text
//! payload ─► core handlers (observe only)
//!        ─► "*" hooks, descending priority ─► exact-tag hooks, descending priority
//!        ─► forwarded payload
//! ```
//!
//! Each hook receives the output of the previous one. Chains never
//! short-circuit: a hook that empties the payload hands the empty payload on
//! to the next hook. A hook that panics is logged against its module and
//! skipped; the payload it received goes to the next hook unchanged.

use crate::dispatch::hook::{HookTable, PacketHook, PacketMeta, WILDCARD};
use crate::dispatch::module::{ModuleContext, ModuleRegistry};
use crate::proxy::session::SessionKey;
use crate::state::StateStore;
use crate::utils::config::StateConfig;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Engine-owned observer run ahead of every module hook
pub trait CoreHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Observe a packet. Must not alter it.
    fn observe(&self, op: &str, payload: &[u8]);
}

impl CoreHandler for StateStore {
    fn name(&self) -> &str {
        "session state"
    }

    fn observe(&self, op: &str, payload: &[u8]) {
        self.ingest(op, payload);
    }
}

/// All dispatch state for one authenticated session
pub struct Dispatch {
    session: SessionKey,
    hooks: RwLock<HookTable>,
    core_handlers: Vec<Arc<dyn CoreHandler>>,
    modules: Mutex<Vec<ModuleContext>>,
    state: StateStore,
    initialized: AtomicBool,
}

impl Dispatch {
    /// Create a session and run every registered module's init function
    pub fn start(
        session: SessionKey,
        state_config: StateConfig,
        registry: &ModuleRegistry,
    ) -> Arc<Self> {
        let dispatch = Self::new(session, state_config);
        dispatch.init_modules(registry);
        dispatch
    }

    fn new(session: SessionKey, state_config: StateConfig) -> Arc<Self> {
        let state = StateStore::new(state_config);
        let core_handlers: Vec<Arc<dyn CoreHandler>> = vec![Arc::new(state.clone())];

        Arc::new(Self {
            session,
            hooks: RwLock::new(HookTable::new()),
            core_handlers,
            modules: Mutex::new(Vec::new()),
            state,
            initialized: AtomicBool::new(false),
        })
    }

    fn init_modules(self: &Arc<Self>, registry: &ModuleRegistry) {
        let start = Instant::now();

        for descriptor in registry.iter() {
            let ctx = ModuleContext::new(
                Arc::clone(&descriptor.name),
                self.session.clone(),
                Arc::downgrade(self),
                self.state.clone(),
            );

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| descriptor.init(&ctx)));
            ctx.seal();

            if let Err(panic) = outcome {
                warn!(
                    "Module {} panicked during init for {}: {}",
                    descriptor.name,
                    self.session,
                    panic_message(&panic)
                );
                for hook in ctx.take_hooks() {
                    self.hooks.write().remove(&hook);
                }
                for handle in ctx.take_state_hooks() {
                    handle.unhook();
                }
                continue;
            }

            info!("{} loaded for {}", descriptor.name, self.session);
            self.modules.lock().push(ctx);
        }

        self.hooks.write().sort();
        self.initialized.store(true, Ordering::Release);
        debug!(
            "Modules loaded for {} in {}ms",
            self.session,
            start.elapsed().as_millis()
        );
    }

    /// Run `payload` through core handlers and the hook chain for `op`
    pub fn dispatch(&self, op: &str, payload: Bytes, meta: &PacketMeta) -> Bytes {
        for handler in &self.core_handlers {
            handler.observe(op, &payload);
        }

        // Snapshot the chains so hooks may unhook themselves mid-dispatch
        let chain: Vec<Arc<PacketHook>> = {
            let table = self.hooks.read();
            let mut chain = table.chain(WILDCARD);
            if op != WILDCARD {
                chain.extend(table.chain(op));
            }
            chain
        };

        chain
            .iter()
            .fold(payload, |data, hook| self.run_hook(hook, op, data, meta))
    }

    fn run_hook(&self, hook: &PacketHook, op: &str, data: Bytes, meta: &PacketMeta) -> Bytes {
        let input = data.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| hook.handle(op, input, meta))) {
            Ok(output) => output,
            Err(panic) => {
                warn!(
                    "Recovered from panic while executing {} on {} for {}: {}",
                    hook.module(),
                    op,
                    self.session,
                    panic_message(&panic)
                );
                metrics::counter!("gatehook_hook_faults_total").increment(1);
                data
            }
        }
    }

    pub(crate) fn insert_hook(&self, hook: Arc<PacketHook>) {
        self.hooks.write().insert(hook);
    }

    pub(crate) fn remove_hook(&self, hook: &Arc<PacketHook>) {
        if !self.hooks.write().remove(hook) {
            warn!("Tried to remove hook that doesn't exist: {:?}", hook);
        }
    }

    /// Invoke every module's shutdown callback. Each runs at most once.
    pub fn shutdown(&self, shutting_down: bool) {
        let modules = self.modules.lock().clone();
        for module in modules {
            let Some(callback) = module.take_shutdown() else {
                continue;
            };
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(shutting_down))) {
                warn!(
                    "Module {} panicked during shutdown for {}: {}",
                    module.name(),
                    self.session,
                    panic_message(&panic)
                );
            }
        }
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .lock()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("session", &self.session)
            .field("hooks", &self.hook_count())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
