use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alertsync_operator::{
    backend::HttpAlertingClient,
    config::Config,
    controllers::{AlertDefinitionController, AlertGroupConfigController, Context},
    metrics,
    server::Server,
    store::{KubeEventSink, KubeResourceStore},
};

#[derive(Debug, Parser)]
#[command(name = "alertsync-operator", about = "Syncs AlertDefinition and AlertGroupConfig resources to an alerting backend")]
struct Args {
    /// Address serving /health and /metrics
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(addr) = args.metrics_addr {
        config.server.addr = addr;
    }
    if let Some(namespace) = args.namespace.filter(|ns| !ns.is_empty()) {
        config.kube.namespace = Some(namespace);
    }
    info!("Loaded configuration: {:?}", config);

    metrics::register_metrics();

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let store = Arc::new(KubeResourceStore::new(client.clone(), config.kube.field_manager.clone()));
    let events = Arc::new(KubeEventSink::new(client.clone(), config.kube.field_manager.clone()));
    let alerts = Arc::new(HttpAlertingClient::new(config.backend.url.clone()));
    let ctx = Arc::new(Context::new(store, alerts, events, config.requeue.clone()));

    let definitions = Arc::new(AlertDefinitionController::new(
        client.clone(),
        config.kube.namespace.clone(),
        ctx.clone(),
    ));
    let group_configs = Arc::new(AlertGroupConfigController::new(
        client,
        config.kube.namespace.clone(),
        ctx,
    ));

    let server = Server::new(&config.server);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Metrics server error: {}", e);
        }
    });

    // Both controllers stop on SIGTERM/SIGINT.
    tokio::join!(definitions.run(), group_configs.run());
    info!("Controllers stopped, shutting down");
    server_handle.abort();

    Ok(())
}
