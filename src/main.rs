use std::sync::Arc;

use clap::Parser;
use loyalty_ledger::{Config, HttpAccrualClient, Ledger, MemoryStore, ReconciliationScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(config.log_json);

    let interval = config.poll_interval().expect("invalid poll interval");
    let client_config = config.accrual_client().expect("invalid accrual client configuration");
    let oracle = HttpAccrualClient::new(client_config).expect("failed to build accrual client");

    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone(), Arc::new(oracle));

    let shutdown = CancellationToken::new();
    let scheduler = ReconciliationScheduler::new(ledger.orders(), interval);
    let mut handle = tokio::spawn(scheduler.run(shutdown.clone()));

    info!(accrual = %config.accrual_system_address, "loyalty ledger running");
    shutdown_signal().await;
    info!("shutdown requested");
    shutdown.cancel();

    match tokio::time::timeout(config.shutdown_grace(), &mut handle).await {
        Ok(Ok(ticks)) => info!(ticks, "scheduler drained"),
        Ok(Err(e)) => warn!(reason = %e, "scheduler task failed"),
        Err(_) => {
            warn!(grace = ?config.shutdown_grace(), "scheduler did not drain in time, aborting");
            handle.abort();
        }
    }

    store.close();
}
