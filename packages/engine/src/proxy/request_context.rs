// packages/engine/src/proxy/request_context.rs
//! Per-exchange request context
//!
//! Created when a request is classified and carried to its response, so the
//! response leg knows whether to dispatch, under which session, and what the
//! client originally sent.

use crate::dispatch::{Dispatch, PacketMeta};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Request as handed over by the transport
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    /// `host[:port]` the request is addressed to
    pub host: String,

    /// URL path
    pub path: String,

    /// Value of the user id header, if present
    pub uid: Option<String>,

    pub body: Bytes,
}

/// What the transport should do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Answer locally with an empty `200 OK`; there is no response leg
    Blocked,

    /// Forward untouched
    PassThrough,

    /// Forward with this (possibly rewritten) body
    Dispatched(Bytes),
}

/// State carried from a request to its response
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub blocked: bool,
    pub host: String,

    /// Path with surrounding slashes trimmed, shared by both legs' tags
    pub route: String,

    pub request_data: Option<Bytes>,
    pub started_at: Instant,
    pub(crate) dispatch: Option<Arc<Dispatch>>,
}

impl RequestContext {
    pub(crate) fn new(host: &str, path: &str) -> Self {
        Self {
            blocked: false,
            host: host.to_string(),
            route: path.trim_matches('/').to_string(),
            request_data: None,
            started_at: Instant::now(),
            dispatch: None,
        }
    }

    /// Operation tag of the outbound leg
    pub fn request_op(&self) -> String {
        format!("C/{}", self.route)
    }

    /// Operation tag of the inbound leg
    pub fn response_op(&self) -> String {
        format!("S/{}", self.route)
    }

    /// Whether this exchange belongs to a session
    pub fn is_game_traffic(&self) -> bool {
        self.dispatch.is_some()
    }

    pub(crate) fn meta(&self) -> PacketMeta {
        PacketMeta {
            host: self.host.clone(),
            request_op: self.request_op(),
            request_data: self.request_data.clone(),
            started_at: self.started_at,
        }
    }
}
