mod error;
mod service_manager;

pub use error::OrchestratorError;
pub use service_manager::{CreateServiceRequest, ServiceManager, ServiceStatusReport};

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::controller::ControllerManager;
use crate::models::{AppState, ControllerRecord};

async fn initialize() -> Result<(Arc<AppState>, Arc<ControllerManager>, Arc<ServiceManager>)> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    info!("Connecting to PostgreSQL database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = Arc::new(AppState {
        db: Arc::new(pool),
        config: Arc::new(config),
    });
    let controllers = Arc::new(ControllerManager::new(Arc::clone(&state)).await?);
    let services = Arc::new(ServiceManager::new(Arc::clone(&state), Arc::clone(&controllers))?);
    Ok((state, controllers, services))
}

/// Run the orchestration loops until Ctrl-C: the periodic controller health
/// sweep plus any per-service health monitors started by lifecycle calls.
pub async fn run() -> Result<()> {
    let (_state, controllers, services) = initialize().await?;

    // Seed placement data before the first request can arrive.
    controllers.check_all().await;
    let sweep = controllers.run_health_sweep();

    info!("spacedock operator running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    sweep.abort();
    services.shutdown().await;
    Ok(())
}

/// One-shot fleet summary: health-check every controller now and print the
/// persisted registry state plus local host usage.
pub async fn status() -> Result<()> {
    let (state, controllers, services) = initialize().await?;

    controllers.check_all().await;
    let records = ControllerRecord::find_all(&state.db).await?;

    println!("{:<12} {:<28} {:<8} {:<10} {:>6} {:>10}", "ID", "URL", "TYPE", "STATUS", "LOAD%", "FAILURES");
    for c in records {
        println!(
            "{:<12} {:<28} {:<8} {:<10} {:>6} {:>10}",
            c.id,
            c.base_url,
            c.server_type,
            format!("{:?}", c.status).to_lowercase(),
            c.load_percentage.map(|l| format!("{l:.1}")).unwrap_or_else(|| "-".to_string()),
            c.total_failures,
        );
    }

    let usage = services.resources().get_system_resource_usage();
    println!(
        "\nhost: cpu {:.1}%, memory {} MB ({:.1}%), disk {} GB ({:.1}%)",
        usage.cpu_percent,
        usage.memory_used_mb,
        usage.memory_percent,
        usage.disk_used_gb,
        usage.disk_percent,
    );
    Ok(())
}
