// packages/engine/src/interception/http_interceptor.rs
//! Plain-HTTP transport adapter
//!
//! A forward proxy for absolute-form HTTP requests. Each request/response pair
//! is fed through the [`Proxy`] front-end: requests and responses are read
//! fully, dispatched on tokio's blocking pool (hooks are synchronous and may
//! block), then forwarded. CONNECT tunnels to filtered hosts are refused; TLS
//! termination for the rest belongs to an external transport.

use crate::proxy::{InterceptedRequest, Proxy, RequestOutcome};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Configuration for the HTTP interceptor
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Proxy listen address
    pub listen_addr: SocketAddr,

    /// Header carrying the user id, forwarded to the front-end
    pub uid_header: String,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            uid_header: "uid".to_string(),
        }
    }
}

/// HTTP interceptor feeding a [`Proxy`]
pub struct HttpInterceptor {
    config: InterceptorConfig,
    proxy: Arc<Proxy>,
    http_client: hyper_util::client::legacy::Client<
        hyper_util::client::legacy::connect::HttpConnector,
        Full<Bytes>,
    >,
}

impl HttpInterceptor {
    /// Create a new HTTP interceptor
    pub fn new(config: InterceptorConfig, proxy: Arc<Proxy>) -> Self {
        let http_client = hyper_util::client::legacy::Client::builder(
            hyper_util::rt::TokioExecutor::new(),
        )
        .build_http();

        Self {
            config,
            proxy,
            http_client,
        }
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;

        info!("proxy server listening on {}", self.config.listen_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let interceptor = Arc::clone(&self);

                    tokio::spawn(async move {
                        debug!("Accepted connection from {}", addr);

                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let interceptor = Arc::clone(&interceptor);
                            async move { interceptor.handle_request(req).await }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Handle one proxied exchange
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        if req.method() == Method::CONNECT {
            let host = req
                .uri()
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_default();
            return Ok(self.handle_connect(&host));
        }

        let (parts, body) = req.into_parts();
        let host = request_host(&parts.uri, &parts.headers);
        let body = body
            .collect()
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Body read error: {}", e)))?
            .to_bytes();

        let intercepted = InterceptedRequest {
            host: host.clone(),
            path: parts.uri.path().to_string(),
            uid: parts
                .headers
                .get(self.config.uid_header.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: body.clone(),
        };

        let proxy = Arc::clone(&self.proxy);
        let (ctx, outcome) = tokio::task::spawn_blocking(move || proxy.handle_request(intercepted))
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Dispatch task failed: {}", e)))?;

        let forward_body = match outcome {
            RequestOutcome::Blocked => return Ok(status_response(StatusCode::OK)),
            RequestOutcome::PassThrough => body,
            RequestOutcome::Dispatched(rewritten) => rewritten,
        };

        let mut upstream = Request::builder()
            .method(parts.method.clone())
            .uri(upstream_uri(&parts.uri, &host)?)
            .body(Full::new(forward_body))
            .map_err(|e| {
                EngineError::InterceptionFailed(format!("Request build error: {}", e))
            })?;
        *upstream.headers_mut() = forwardable(parts.headers);

        let response = match self.http_client.request(upstream).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to reach {}: {}", host, e);
                return Ok(status_response(StatusCode::BAD_GATEWAY));
            }
        };

        let (mut resp_parts, resp_body) = response.into_parts();
        let resp_bytes = resp_body
            .collect()
            .await
            .map_err(|e| {
                EngineError::InterceptionFailed(format!("Response body error: {}", e))
            })?
            .to_bytes();

        let resp_bytes = if ctx.is_game_traffic() {
            let proxy = Arc::clone(&self.proxy);
            tokio::task::spawn_blocking(move || proxy.handle_response(&ctx, resp_bytes))
                .await
                .map_err(|e| {
                    EngineError::InterceptionFailed(format!("Dispatch task failed: {}", e))
                })?
        } else {
            resp_bytes
        };

        resp_parts.headers = forwardable(resp_parts.headers);
        Ok(Response::from_parts(resp_parts, Full::new(resp_bytes)))
    }

    fn handle_connect(&self, host: &str) -> Response<Full<Bytes>> {
        if !self.proxy.should_intercept(host) {
            debug!("==== Rejecting {}", host);
            return status_response(StatusCode::FORBIDDEN);
        }

        warn!("CONNECT to {} refused, no TLS transport attached", host);
        status_response(StatusCode::NOT_IMPLEMENTED)
    }
}

/// `host[:port]` from the absolute URI, falling back to the Host header
fn request_host(uri: &Uri, headers: &HeaderMap) -> String {
    uri.authority()
        .map(|a| a.to_string())
        .or_else(|| {
            headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// Absolute URI to forward to
fn upstream_uri(uri: &Uri, host: &str) -> Result<Uri> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{}{}", host, path_and_query)
        .parse()
        .map_err(|e| EngineError::InterceptionFailed(format!("Invalid upstream URI: {}", e)))
}

/// Drop framing headers; bodies are re-sent in full with a fresh length
fn forwardable(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
    headers
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
