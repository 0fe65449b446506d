// packages/engine/src/proxy/mod.rs
//! Proxy front-end
//!
//! Classifies traffic, demultiplexes game traffic by session identity, and
//! creates and tears down each session's `Dispatch`.
//!
//! - **Session**: `(region, uid)` identity
//! - **Request Context**: State carried from a request to its response
//! - **Front End**: The `Proxy` itself

pub mod front_end;
pub mod request_context;
pub mod session;

pub use front_end::Proxy;
pub use request_context::{InterceptedRequest, RequestContext, RequestOutcome};
pub use session::SessionKey;
