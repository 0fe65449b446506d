// packages/engine/src/proxy/front_end.rs
//! Proxy front-end: classification and session routing
//!
//! ```text
//! request ─► HostFilter ─┬─ Blocked ──────► empty 200, no dispatch
//!                        ├─ PassThrough ──► forwarded untouched
//!                        └─ Game{region} ─► uid header / login body
//!                                             │
//!                              login op ──► new Dispatch (old one shut down)
//!                              otherwise ─► existing Dispatch, if any
//!                                             │
//!                              dispatch("C/<path>") ... dispatch("S/<path>")
//! ```

use crate::dispatch::engine::panic_message;
use crate::dispatch::{Dispatch, ModuleRegistry};
use crate::interception::host_filter::{HostClass, HostFilter};
use crate::interception::tls_handler::{CertificateData, CertificateGenerator, TlsHandler};
use crate::proxy::request_context::{InterceptedRequest, RequestContext, RequestOutcome};
use crate::proxy::session::SessionKey;
use crate::utils::config::{EngineConfig, ProxyConfig, StateConfig, TlsConfig};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Session-routing front-end shared by every connection
pub struct Proxy {
    config: ProxyConfig,
    state_config: StateConfig,
    tls_config: TlsConfig,
    filter: HostFilter,
    modules: ModuleRegistry,
    sessions: DashMap<SessionKey, Arc<Dispatch>>,
    tls: Option<TlsHandler>,
    started: AtomicBool,
}

impl Proxy {
    /// Create the front-end. `modules` is read-only from here on.
    pub fn new(config: &EngineConfig, modules: ModuleRegistry) -> Result<Self> {
        config.validate()?;
        let filter = HostFilter::from_config(&config.proxy)?;

        info!(
            "Proxy ready with {} modules: {:?}",
            modules.len(),
            modules.names()
        );

        Ok(Self {
            config: config.proxy.clone(),
            state_config: config.state.clone(),
            tls_config: config.tls.clone(),
            filter,
            modules,
            sessions: DashMap::new(),
            tls: None,
            started: AtomicBool::new(false),
        })
    }

    /// Run the modules' start callbacks. Call once the proxy is ready to
    /// serve; later calls do nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        for callback in self.modules.start_callbacks() {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                warn!("Start callback panicked: {}", panic_message(&panic));
            }
        }
        info!("Proxy started");
    }

    /// Attach the transport's certificate generator, fronted by the cache
    pub fn with_certificate_generator(mut self, generator: Arc<dyn CertificateGenerator>) -> Self {
        self.tls = Some(TlsHandler::new(self.tls_config.clone(), generator));
        self
    }

    /// Whether a CONNECT to `host` should be intercepted rather than refused
    pub fn should_intercept(&self, host: &str) -> bool {
        self.filter.should_intercept(host)
    }

    /// Leaf certificate for an intercepted host
    pub fn certificate_for(&self, host: &str) -> Result<Arc<CertificateData>> {
        self.tls
            .as_ref()
            .ok_or_else(|| {
                EngineError::CertificateGeneration("no certificate generator attached".to_string())
            })?
            .certificate_for(host)
    }

    /// Process the outbound leg of an exchange
    pub fn handle_request(&self, req: InterceptedRequest) -> (RequestContext, RequestOutcome) {
        let mut ctx = RequestContext::new(&req.host, &req.path);

        let region = match self.filter.classify(&req.host) {
            HostClass::Blocked => {
                ctx.blocked = true;
                return (ctx, RequestOutcome::Blocked);
            }
            HostClass::PassThrough => return (ctx, RequestOutcome::PassThrough),
            HostClass::Game { region } => region,
        };

        let op = ctx.request_op();
        let Some(dispatch) = self.route(&op, region, &req) else {
            return (ctx, RequestOutcome::PassThrough);
        };

        ctx.request_data = Some(req.body.clone());
        ctx.dispatch = Some(Arc::clone(&dispatch));

        let body = dispatch.dispatch(&op, req.body, &ctx.meta());
        debug!(">>>> {} ({}ms)", op, ctx.started_at.elapsed().as_millis());

        (ctx, RequestOutcome::Dispatched(body))
    }

    /// Process the inbound leg of an exchange
    pub fn handle_response(&self, ctx: &RequestContext, body: Bytes) -> Bytes {
        if ctx.blocked {
            return body;
        }
        let Some(dispatch) = &ctx.dispatch else {
            return body;
        };

        let received = Instant::now();
        let op = ctx.response_op();
        let body = dispatch.dispatch(&op, body, &ctx.meta());
        debug!(
            "<<<< {} ({}ms,{}ms)",
            op,
            received.duration_since(ctx.started_at).as_millis(),
            received.elapsed().as_millis()
        );

        body
    }

    /// Find or, on login, create the session a game request belongs to
    fn route(&self, op: &str, region: String, req: &InterceptedRequest) -> Option<Arc<Dispatch>> {
        match req.uid.as_deref().filter(|uid| !uid.is_empty()) {
            Some(uid) => match uid.parse::<u64>() {
                Ok(uid) => self.session(&SessionKey::new(region, uid)),
                Err(_) => {
                    warn!("Ignoring {} with non-numeric uid header {:?}", op, uid);
                    None
                }
            },
            None if op == self.config.login_op => {
                let uid = login_uid(&req.body)?;
                Some(self.add_user(SessionKey::new(region, uid)))
            }
            None => None,
        }
    }

    /// Start a session for `key`, shutting down any previous one.
    ///
    /// The map entry stays locked across shutdown, module init and insert,
    /// so lookups for `key` wait for the new session instead of missing.
    fn add_user(&self, key: SessionKey) -> Arc<Dispatch> {
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                info!("{} reconnecting. Shutting down modules.", key);
                entry.get().shutdown(false);

                let dispatch = self.start_session(key);
                entry.insert(Arc::clone(&dispatch));
                dispatch
            }
            Entry::Vacant(entry) => {
                info!("User {} logged in", key);

                let dispatch = self.start_session(key);
                entry.insert(Arc::clone(&dispatch));
                dispatch
            }
        }
    }

    fn start_session(&self, key: SessionKey) -> Arc<Dispatch> {
        metrics::counter!("gatehook_sessions_created_total").increment(1);
        Dispatch::start(key, self.state_config.clone(), &self.modules)
    }

    /// Current session for `key`
    pub fn session(&self, key: &SessionKey) -> Option<Arc<Dispatch>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Notify every session's modules that the process is shutting down
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Dispatch>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        info!("Shutting down {} sessions", sessions.len());
        for dispatch in sessions {
            dispatch.shutdown(true);
        }
    }
}

/// Read the user id from a login request body
fn login_uid(body: &[u8]) -> Option<u64> {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Malformed login request: {}", e);
            return None;
        }
    };

    let uid = match parsed.get("uid") {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    if uid.is_none() {
        warn!("Login request without a numeric uid: {}", parsed);
    }
    uid
}
