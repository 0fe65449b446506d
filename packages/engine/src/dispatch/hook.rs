// packages/engine/src/dispatch/hook.rs
//! Packet hooks and the per-session hook table
//!
//! A hook is an immutable record of one module's interest in one operation
//! tag. Once inserted it is never mutated; removal is by identity.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Target tag matching every operation
pub const WILDCARD: &str = "*";

/// Request metadata handed to every hook alongside the payload
#[derive(Debug, Clone)]
pub struct PacketMeta {
    /// Host the exchange was addressed to
    pub host: String,

    /// Operation tag of the originating request (`C/...`)
    pub request_op: String,

    /// Body of the originating request as the client sent it
    pub request_data: Option<Bytes>,

    /// When the proxy first saw the request
    pub started_at: Instant,
}

impl PacketMeta {
    pub fn new(host: impl Into<String>, request_op: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            request_op: request_op.into(),
            request_data: None,
            started_at: Instant::now(),
        }
    }
}

/// Handler supplied by a module: operation tag + payload + metadata in,
/// possibly rewritten payload out
pub type PacketHandler = Arc<dyn Fn(&str, Bytes, &PacketMeta) -> Bytes + Send + Sync>;

/// One module's subscription to one operation tag
pub struct PacketHook {
    target: String,
    priority: i32,
    handler: PacketHandler,
    module: Arc<str>,
}

impl PacketHook {
    pub fn new(
        target: impl Into<String>,
        priority: i32,
        module: Arc<str>,
        handler: PacketHandler,
    ) -> Self {
        Self {
            target: target.into(),
            priority,
            handler,
            module,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Name of the owning module
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn handle(&self, op: &str, data: Bytes, meta: &PacketMeta) -> Bytes {
        (self.handler)(op, data, meta)
    }
}

impl fmt::Debug for PacketHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketHook")
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Operation tag -> hooks, in descending priority once sorted
#[derive(Debug, Default)]
pub struct HookTable {
    hooks: HashMap<String, Vec<Arc<PacketHook>>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hook: Arc<PacketHook>) {
        self.hooks
            .entry(hook.target.clone())
            .or_default()
            .push(hook);
    }

    /// Sort every chain by descending priority.
    ///
    /// `sort_by` is stable: hooks of equal priority keep registration order.
    pub fn sort(&mut self) {
        for chain in self.hooks.values_mut() {
            chain.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }

    /// Remove by identity. Returns false if the hook was not present.
    pub fn remove(&mut self, hook: &Arc<PacketHook>) -> bool {
        let Some(chain) = self.hooks.get_mut(&hook.target) else {
            return false;
        };

        let before = chain.len();
        chain.retain(|h| !Arc::ptr_eq(h, hook));
        chain.len() != before
    }

    /// Snapshot of the chain for `target`
    pub fn chain(&self, target: &str) -> Vec<Arc<PacketHook>> {
        self.hooks.get(target).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hook(target: &str, priority: i32, tag: &'static str) -> Arc<PacketHook> {
        Arc::new(PacketHook::new(
            target,
            priority,
            Arc::from(tag),
            Arc::new(|_: &str, data: Bytes, _: &PacketMeta| data),
        ))
    }

    fn modules(table: &HookTable, target: &str) -> Vec<String> {
        table
            .chain(target)
            .iter()
            .map(|h| h.module().to_string())
            .collect()
    }

    #[test]
    fn test_sort_descending() {
        let mut table = HookTable::new();
        table.insert(hook("S/a", 1, "low"));
        table.insert(hook("S/a", 10, "high"));
        table.insert(hook("S/a", 5, "mid"));
        table.sort();

        assert_eq!(modules(&table, "S/a"), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let mut table = HookTable::new();
        for tag in ["first", "second", "third"] {
            table.insert(hook("S/a", 0, tag));
        }
        table.insert(hook("S/a", 3, "top"));
        table.sort();

        assert_eq!(modules(&table, "S/a"), vec!["top", "first", "second", "third"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let mut table = HookTable::new();
        let a = hook("S/a", 0, "same");
        let b = hook("S/a", 0, "same");
        table.insert(Arc::clone(&a));
        table.insert(Arc::clone(&b));

        assert!(table.remove(&a));
        assert!(!table.remove(&a));
        assert!(!table.remove(&hook("S/missing", 0, "same")));

        let chain = table.chain("S/a");
        assert_eq!(chain.len(), 1);
        assert!(Arc::ptr_eq(&chain[0], &b));
    }

    proptest! {
        #[test]
        fn prop_sorted_chain_is_stable(priorities in prop::collection::vec(-3i32..3, 0..24)) {
            let mut table = HookTable::new();
            let hooks: Vec<_> = priorities
                .iter()
                .map(|p| hook("S/a", *p, "m"))
                .collect();
            for h in &hooks {
                table.insert(Arc::clone(h));
            }
            table.sort();

            let index_of = |h: &Arc<PacketHook>| hooks.iter().position(|x| Arc::ptr_eq(x, h)).unwrap();
            let chain = table.chain("S/a");
            for pair in chain.windows(2) {
                prop_assert!(pair[0].priority() >= pair[1].priority());
                if pair[0].priority() == pair[1].priority() {
                    prop_assert!(index_of(&pair[0]) < index_of(&pair[1]));
                }
            }
        }
    }
}
