//! fip-controller - keeps Hetzner Cloud floating IPs on healthy nodes

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fip_common::leader_election::{KubeLeaseLock, LeaseConfig, LeaseLock};
use fip_common::telemetry::init_logging;
use fip_controller::topology::{ClusterApi, KubeClusterApi};
use fip_controller::{
    reconciler, Cli, Config, ControllerContext, GateConfig, LeaderGate, ReconcileSettings,
};
use fip_hcloud::{CloudApi, HcloudClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli)?;

    init_logging(&config.logging())?;

    if let Err(e) = config.validate() {
        error!(error = %e, "Refusing to start");
        return Err(e.into());
    }

    info!(
        namespace = %config.namespace,
        pod = %config.pod_name,
        lease = %config.lease_name,
        address_type = %config.node_address_type,
        "Starting fip-controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    let cloud: Arc<dyn CloudApi> = Arc::new(HcloudClient::new(
        &config.hcloud_api_token,
        &config.hcloud_endpoint,
    )?);
    let cluster: Arc<dyn ClusterApi> =
        Arc::new(KubeClusterApi::new(client.clone(), config.namespace.clone()));
    let ctx = Arc::new(ControllerContext::new(
        cluster,
        cloud,
        ReconcileSettings::from_config(&config)?,
    ));

    let lock: Arc<dyn LeaseLock> = Arc::new(KubeLeaseLock::new(
        client,
        LeaseConfig {
            name: config.lease_name.clone(),
            namespace: config.namespace.clone(),
            identity: config.pod_name.clone(),
            lease_duration: config.lease_duration,
        },
    ));
    let gate = LeaderGate::new(
        lock,
        GateConfig {
            renew_deadline: config.lease_renew_deadline,
            retry_period: config.lease_retry_period,
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    gate.run(shutdown, |leading| {
        let ctx = ctx.clone();
        async move { reconciler::run(&ctx, leading).await }
    })
    .await?;

    info!("fip-controller stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for SIGINT");
                return;
            }
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
