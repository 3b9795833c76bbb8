//! Store-and-forward temperature/humidity agent.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use rackwatch_agent::{
    AgentArgs, AgentConfig, AgentError, ConfiguredSource, ControlHandle, ControlServer,
    Dispatcher, HttpTransport, PendingQueue, Scheduler,
};

/// Pending control requests before HTTP handlers start waiting.
const CONTROL_BACKLOG: usize = 16;

/// How long background tasks get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AgentArgs::parse();

    // Load configuration
    let (config_path, required) = args.config_path();
    let mut config = match AgentConfig::load(&config_path) {
        Ok(config) => config,
        Err(AgentError::ConfigNotFound { .. }) if !required => AgentConfig::default(),
        Err(e) => return Err(e.into()),
    };

    // CLI overrides
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(listen) = &args.listen {
        config.control.listen = listen.clone();
    }
    config.validate()?;

    rackwatch_common::init_tracing(&config.logging)?;

    info!(
        config = %config_path.display(),
        "Starting rackwatch agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Build components
    let transport = HttpTransport::new(&config.collector)?;
    let queue = PendingQueue::from_config(&config.queue);
    queue.prepare().await?;
    let source = ConfiguredSource::from_config(&config.sensor);

    info!(
        collector = %transport.url(),
        timeout_ms = config.collector.timeout_ms,
        queue = %queue.path().display(),
        truncation = ?queue.truncation(),
        pending = queue.exists().await,
        sensor = %source.describe(),
        "Agent configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, control_rx) = ControlHandle::channel(CONTROL_BACKLOG);
    let server = ControlServer::bind(handle, config.control.listen_addr()?).await?;

    let scheduler = Scheduler::new(
        source,
        Dispatcher::new(transport, queue),
        config.scheduler.interval_ms,
        control_rx,
    );

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!("Control server error: {}", e);
        }
    });

    wait_for_signal().await;

    // Signal shutdown
    shutdown_tx.send(true)?;

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = scheduler_task.await;
        let _ = server_task.await;
    })
    .await
    .is_err()
    {
        warn!("Tasks did not stop within {:?}", SHUTDOWN_GRACE);
    }

    info!("Agent stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
