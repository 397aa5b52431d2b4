//! vmcluster control plane service.
//!
//! Opens the store, wires committed mutations to the change event
//! dispatcher, and serves the lifecycle API.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vmcluster_control::api::{self, AppState};
use vmcluster_control::{ControlConfig, ControlPlaneService, StaticProvider};
use vmcluster_events::{ChangeDispatcher, ChannelPublisher};
use vmcluster_scheduler::{AgentClient, GraphRunner, HttpAgentClient, NoopAgentClient};
use vmcluster_store::RocksStore;

fn load_config() -> Result<ControlConfig, Box<dyn std::error::Error>> {
    match std::env::var("CONFIG_FILE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let config = serde_json::from_str(&raw)?;
            tracing::info!(config_file = %path, "Loaded configuration");
            Ok(config)
        }
        Err(_) => Ok(ControlConfig::default()),
    }
}

fn agent_client() -> Result<Arc<dyn AgentClient>, Box<dyn std::error::Error>> {
    match std::env::var("PILOT_URL") {
        Ok(url) => {
            tracing::info!(pilot_url = %url, "Using HTTP pilot client");
            Ok(Arc::new(HttpAgentClient::new(url)?))
        }
        Err(_) => {
            tracing::warn!("PILOT_URL not set, tasks will not be executed");
            Ok(Arc::new(NoopAgentClient::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vmcluster=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vmcluster control plane");

    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string());
    let config = load_config()?;

    // Initialize store and change events
    let store = Arc::new(RocksStore::open(&data_dir)?);
    let publisher = Arc::new(ChannelPublisher::new());
    store.set_observer(Arc::new(ChangeDispatcher::new(
        store.owner_lookup(),
        Arc::clone(&publisher),
    )));
    tracing::info!(data_dir = %data_dir, "Initialized RocksDB store");

    let runner = Arc::new(GraphRunner::new(agent_client()?, config.planner.task_timeout()));
    let provider = Arc::new(StaticProvider::from_config(&config));
    let control = Arc::new(ControlPlaneService::new(store, provider, config));

    let app = api::create_router(AppState {
        control,
        runner,
        events: publisher,
    });

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
