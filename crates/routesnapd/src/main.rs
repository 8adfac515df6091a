//! routesnapd - route table snapshot and churn daemon
//!
//! Periodically snapshots the RIB and BGP tables of every inventory device,
//! diffs them against the previous cycle, persists both, and exports churn
//! metrics for alerting.

use clap::Parser;
use routesnap_device::Collector;
use routesnapd::api::{self, ApiState};
use routesnapd::config::Config;
use routesnapd::inventory::{DeviceDefaults, InventorySource, NetboxInventory, StaticInventory};
use routesnapd::metrics::Metrics;
use routesnapd::scheduler::Scheduler;
use routesnapd::store::SnapshotStore;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("routesnapd=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("routesnapd v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e:#}");
        return ExitCode::FAILURE;
    }

    let defaults = DeviceDefaults {
        username: config.username.clone().unwrap_or_default(),
        password: config.password.clone().unwrap_or_default(),
        vrfs: config.vrfs.clone(),
        afis: config.afis.clone(),
    };
    let inventory: Arc<dyn InventorySource> = if config.use_netbox {
        let url = config.netbox_url.as_deref().unwrap_or_default();
        let token = config.netbox_token.as_deref().unwrap_or_default();
        match NetboxInventory::new(url, token, defaults) {
            Ok(netbox) => Arc::new(netbox),
            Err(e) => {
                error!("NetBox inventory setup failed: {e:#}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let path = config.inventory.clone().unwrap_or_default();
        match StaticInventory::from_file(&path, &defaults) {
            Ok(devices) => Arc::new(devices),
            Err(e) => {
                error!("inventory load failed: {e:#}");
                return ExitCode::FAILURE;
            }
        }
    };

    let store = Arc::new(SnapshotStore::new(&config.snapdir));
    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            error!("metrics registry setup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let collector = Arc::new(Collector::new(
        config.use_nxapi,
        config.nxapi_config(),
        Duration::from_secs(30),
    ));

    let scheduler = Scheduler::new(
        store.clone(),
        collector,
        metrics.clone(),
        inventory,
        config.interval(),
        config.max_parallel,
    );

    if config.once {
        let reports = scheduler.run_once().await;
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("report serialization failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let api_state = ApiState {
        store,
        metrics,
    };
    let port = config.prom_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!("API listener failed: {e:#}");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    scheduler.run(shutdown_rx).await;
    ExitCode::SUCCESS
}
