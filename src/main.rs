use std::sync::Arc;

use tracing::info;

use hpc_node_controller::rest_client::{HttpRestClient, RestClient};
use hpc_node_controller::{Controller, ControllerConfig};

#[tokio::main]
async fn main() {
    let config = ControllerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let rest: Arc<dyn RestClient> = Arc::new(HttpRestClient::new(config.rest_base_url.clone()));
    let controller = Controller::new(rest, config.clone());

    controller.subscribe_node_closed(Box::new(|hostnames| {
        info!(hosts = ?hostnames, "nodes closed, scheduler may reclaim resources");
    }));

    info!(
        rest_base_url = %config.rest_base_url,
        node_group = %config.node_group,
        "cluster node controller ready"
    );

    controller.start();

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
