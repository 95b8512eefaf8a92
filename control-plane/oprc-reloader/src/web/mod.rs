use axum::{
    Router,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::webhook::{WebhookState, mutate_handler};
use crate::store::ClusterClient;

/// Health routes, plus `POST /mutate` when a webhook state is given.
pub fn build_router<C: ClusterClient>(
    webhook: Option<Arc<WebhookState<C>>>,
) -> Router {
    // Expose both /health (preferred) and /healthz (legacy) for compatibility
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }));

    let router = match webhook {
        Some(state) => router.merge(
            Router::new()
                .route("/mutate", post(mutate_handler::<C>))
                .with_state(state),
        ),
        None => router,
    };
    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn run_http_server(
    addr: SocketAddr,
    router: Router,
) -> anyhow::Result<()> {
    info!("reloader HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
