use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::{
    admission::webhook::WebhookState,
    config::ReloaderConfig,
    controller::{
        CONTROLLER_NAME, ControllerContext,
        events::{EventPublisher, KubeEventPublisher},
        run_controllers,
    },
    store::KubeClient,
    web::{build_router, run_http_server},
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &ReloaderConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Spawn one controller per enabled workload kind.
pub fn spawn_controllers(
    ctx: Arc<ControllerContext<KubeClient>>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controllers(ctx).await })
}

/// Spawn the HTTP server serving health checks and, when enabled, the
/// mutating admission route.
pub fn spawn_http(
    addr: SocketAddr,
    webhook: Option<Arc<WebhookState<KubeClient>>>,
) -> JoinHandle<anyhow::Result<()>> {
    let router = build_router(webhook);
    tokio::spawn(async move { run_http_server(addr, router).await })
}

/// Start controllers and HTTP server and wait until either finishes.
pub async fn run_all(client: Client, cfg: ReloaderConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let events: Arc<dyn EventPublisher> =
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));

    let webhook = cfg.webhook_enabled.then(|| {
        Arc::new(WebhookState {
            client: KubeClient::new(client.clone()),
            events: events.clone(),
            fetch: cfg.fetch_options(),
        })
    });
    info!(webhook = webhook.is_some(), "admission route");

    let ctx = Arc::new(ControllerContext::new(
        KubeClient::new(client),
        events,
        cfg,
    ));
    let controllers = spawn_controllers(ctx);
    let http = spawn_http(http_addr, webhook);

    let (c_res, h_res) = try_join!(controllers, http)?;
    c_res?;
    h_res?;
    Ok(())
}
