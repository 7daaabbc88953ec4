//! Process entry point: load configuration, wire the capability ports,
//! bind the HTTP surface, and serve until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use safetrace_core::alert::AlertOrchestrator;
use safetrace_core::clock::{Clock, SystemClock};
use safetrace_core::config::Config;
use safetrace_core::evaluator::Evaluator;
use safetrace_core::ingress::Ingress;
use safetrace_core::last_gasp::LastGaspTracker;
use safetrace_core::ports::memory::{MemoryNotifier, MemoryStateCache, MemoryStore};
use safetrace_core::routes::{router, AppState};
use safetrace_core::session::SessionApi;
use safetrace_core::signer::Signer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "safetrace_core=info,tower_http=info".into()))
        .json()
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("[FATAL] configuration error: {e}");
        std::process::exit(1);
    });

    // Store, StateCache, and Notifier are external collaborators with
    // interfaces only. Production backends (Postgres/Redis/Twilio) are
    // out of scope; the in-memory doubles stand in as the wired default.
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryStateCache::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let signer = Arc::new(Signer::new(config.hmac_secret.clone()));

    let last_gasp = Arc::new(LastGaspTracker::new(store.clone()));
    let orchestrator = Arc::new(AlertOrchestrator::new(
        store.clone(),
        cache.clone(),
        notifier,
        clock.clone(),
        config.map_token.clone(),
    ));
    let evaluator = Arc::new(Evaluator::new(
        store.clone(),
        cache.clone(),
        clock.clone(),
        config.thresholds,
        orchestrator.clone(),
    ));
    let ingress = Arc::new(Ingress::new(
        store,
        cache.clone(),
        signer,
        last_gasp,
        evaluator,
        orchestrator.clone(),
        clock.clone(),
        config.thresholds,
    ));
    let session = Arc::new(SessionApi::new(cache, orchestrator));

    let state = AppState { ingress, session, clock };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("[FATAL] could not bind port {}: {e}", config.port);
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            eprintln!("[FATAL] server error: {e}");
            std::process::exit(1);
        });
}

/// Drains in-flight handlers on SIGINT/SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
