// packages/engine/src/state/mod.rs
//! Session state synchronization
//!
//! Reconstructs a mutable mirror of server-authoritative session state from
//! an initial snapshot plus a stream of partial deltas, and lets modules
//! subscribe to changes at individual paths inside that mirror.
//!
//! - **Document**: Override merge, dot-path resolution, delta walk
//! - **Path Hook**: Per-path subscriptions and non-blocking fan-out
//! - **Store**: The mirror, its lock, and the ingest pipeline

pub mod document;
pub mod path_hook;
pub mod store;

pub use path_hook::{PathHookHandle, StateEvent};
pub use store::StateStore;
