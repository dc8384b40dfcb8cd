use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fleetmon::{
    actors::{
        alert::AlertHandle, executor::PollExecutor, recorder::RecorderHandle,
        scheduler::SchedulerHandle, worker_pool::WorkerPoolHandle,
    },
    config::{StorageConfig, read_config_file},
    registry::MemoryRegistry,
    storage::StorageBackend,
    transport::sim::SimTransport,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetmon", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let resolved = config.resolve()?;

    info!("managing {} devices", resolved.devices.len());

    let (backend, retention_days): (Option<Arc<dyn StorageBackend>>, Option<u32>) =
        match &resolved.storage {
            StorageConfig::None => {
                debug!("no storage configured, registry bookkeeping only");
                (None, None)
            }

            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite {
                path,
                retention_days,
            } => {
                let backend = fleetmon::storage::sqlite::SqliteBackend::new(path).await?;
                (Some(Arc::new(backend)), Some(*retention_days))
            }

            #[cfg(not(feature = "storage-sqlite"))]
            StorageConfig::Sqlite { .. } => {
                anyhow::bail!("sqlite storage requires the 'storage-sqlite' feature")
            }
        };

    let registry = Arc::new(MemoryRegistry::new(resolved.devices.clone()));

    // The simulated transport stands in until a wire transport is plugged in
    let transport = Arc::new(SimTransport::new());

    let polling = &resolved.polling;
    let policy = fleetmon::actors::executor::RetryPolicy::from_config(polling);
    let reap_budget = Duration::from_secs(
        polling.timeout_secs * polling.attempts as u64 * polling.reap_safety_factor as u64,
    );

    let (observation_tx, _) = broadcast::channel(1024);

    let (recorder, recorded_tx) = RecorderHandle::spawn(
        registry.clone(),
        backend.clone(),
        retention_days,
        observation_tx.subscribe(),
    );

    let alerts = AlertHandle::spawn(backend.clone(), recorded_tx.subscribe());

    let executor = PollExecutor::new(transport, registry.clone(), policy);
    let pool = WorkerPoolHandle::spawn(
        executor,
        registry.clone(),
        polling.pool_size,
        reap_budget,
        observation_tx,
    );

    let scheduler = SchedulerHandle::spawn(
        registry,
        pool.clone(),
        Duration::from_secs(polling.fleet_interval),
        Duration::from_secs(polling.maintenance_interval),
    );

    info!("polling pipeline running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");

    // Upstream first so nothing new flows while downstream drains
    scheduler.shutdown().await;
    pool.shutdown().await;
    recorder.flush().await.ok();
    recorder.shutdown().await;
    alerts.shutdown().await;

    if let Some(backend) = backend {
        if let Err(e) = backend.close().await {
            error!("error closing storage backend: {e}");
        }
    }

    Ok(())
}
