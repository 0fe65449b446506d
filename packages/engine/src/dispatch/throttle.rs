// packages/engine/src/dispatch/throttle.rs
//! Single-slot background work queue for modules
//!
//! A hook that needs to do slow work (file I/O, table lookups) should not do
//! it on the packet path, but it also must not let that work pile up. The
//! throttle takes the module's slot synchronously inside the hook call, then
//! hands the work to the blocking pool, which releases the slot when the work
//! is done. If the previous job is still running, the next hook call waits
//! for it, throttling that session's packet flow to the module's pace.
//!
//! ```text
//! hook call ──acquire slot (blocks while busy)──► spawn_blocking(work) ──► release slot
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Per-module single-slot work queue
#[derive(Debug, Clone)]
pub struct ModuleThrottle {
    name: Arc<str>,
    slot: Arc<Mutex<()>>,
}

impl ModuleThrottle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            slot: Arc::new(Mutex::new(())),
        }
    }

    /// Run `work` in the background once the previous job has finished.
    ///
    /// Blocks the caller while the slot is taken. Outside a tokio runtime the
    /// work runs inline.
    pub fn submit<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = futures::executor::block_on(Arc::clone(&self.slot).lock_owned());
        trace!("{} acquired its work slot", self.name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    work();
                    drop(permit);
                });
            }
            Err(_) => {
                work();
                drop(permit);
            }
        }
    }

    /// Whether a job currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Wait for the running job, if any, to finish
    pub fn wait_idle(&self) {
        drop(futures::executor::block_on(self.slot.lock()));
    }
}
