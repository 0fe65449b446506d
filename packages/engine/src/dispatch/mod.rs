// packages/engine/src/dispatch/mod.rs
//! Packet dispatch
//!
//! Routes every decoded packet of a session through an ordered,
//! fault-isolated chain of module-supplied hooks.
//!
//! - **Hook**: `PacketHook`, request metadata and the per-session hook table
//! - **Module**: Module registry and the per-session module handle
//! - **Engine**: The `Dispatch` that owns one session's hooks and state
//! - **Throttle**: Single-slot background work queue for module hooks

pub mod engine;
pub mod hook;
pub mod module;
pub mod throttle;

pub use engine::{CoreHandler, Dispatch};
pub use hook::{HookTable, PacketHandler, PacketHook, PacketMeta, WILDCARD};
pub use module::{HookHandle, ModuleContext, ModuleRegistry, ShutdownFn, StartFn};
pub use throttle::ModuleThrottle;
