use envconfig::Envconfig;
use kube::Client;
use oprc_reloader::{config::ReloaderConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = ReloaderConfig::init_from_env()?;
    info!(?cfg, "Starting reloader");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
