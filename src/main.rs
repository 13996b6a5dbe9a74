use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use fieldwatch::config::AppConfig;
use fieldwatch::handlers::AppState;
use fieldwatch::runner::Scheduler;
use fieldwatch::storage::InMemoryStorage;
use fieldwatch::{build_runner, logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    logging::init(&config.log_level, config.log_json);
    info!(config = %config.redacted_json(), "starting fieldwatch");

    let storage = Arc::new(InMemoryStorage::new());
    let runner = build_runner(&config, storage)?;

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        runner.clone(),
        config.scheduler_tick(),
        config.task_cadences(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    let router = server::build_router(AppState {
        runner: runner.clone(),
    });
    let serve = server::serve(config.bind_addr, router, cancel.clone());

    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    cancel.cancel();
    scheduler_handle.await?;
    Ok(())
}
