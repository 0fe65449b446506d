// packages/engine/src/main.rs
//! Gatehook Engine
//!
//! Runs the intercepting proxy with the built-in modules registered.

use anyhow::Result;
use gatehook_engine::dispatch::{ModuleContext, ModuleRegistry, WILDCARD};
use gatehook_engine::interception::{HttpInterceptor, InterceptorConfig};
use gatehook_engine::observability::{init_metrics, init_tracing};
use gatehook_engine::proxy::Proxy;
use gatehook_engine::utils::config::EngineConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Logs every packet and level changes of the player
fn packet_log(ctx: &ModuleContext) {
    let session = ctx.session().to_string();
    ctx.hook(WILDCARD, i32::MIN, move |op, data, meta| {
        debug!(
            "[{}] {} {} bytes ({}ms)",
            session,
            op,
            data.len(),
            meta.started_at.elapsed().as_millis()
        );
        data
    });

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };

    let (tx, mut rx) = mpsc::channel(16);
    let Some(handle) = ctx.state_hook("status.level", tx, true) else {
        return;
    };

    let session = ctx.session().to_string();
    runtime.spawn(async move {
        while let Some(event) = rx.recv().await {
            info!("[{}] {} -> {:?}", session, event.path, event.payload);
        }
    });
    ctx.on_shutdown(move |_| handle.unhook());
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load()?;

    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting Gatehook Engine v{}", gatehook_engine::VERSION);
    debug!("Configuration loaded: {:?}", config);

    let mut modules = ModuleRegistry::new();
    modules
        .register("packet_log", packet_log)
        .on_start(|| info!("packet_log ready, waiting for logins"));

    let proxy = Arc::new(Proxy::new(&config, modules)?);
    proxy.start();
    let interceptor = Arc::new(HttpInterceptor::new(
        InterceptorConfig {
            listen_addr: config.proxy.listen_addr,
            uid_header: config.proxy.uid_header.clone(),
        },
        Arc::clone(&proxy),
    ));

    let result = tokio::select! {
        served = interceptor.start() => served.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, cleaning up...");
            signal.map_err(anyhow::Error::from)
        }
    };

    let proxy_for_shutdown = Arc::clone(&proxy);
    tokio::task::spawn_blocking(move || proxy_for_shutdown.shutdown()).await?;

    match result {
        Ok(()) => {
            info!("Proxy stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Proxy error: {}", e);
            Err(e)
        }
    }
}
