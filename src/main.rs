use std::sync::Arc;

use anyhow::Context;
use log::info;
use model_serving::{Daemon, DaemonConfig, JsonApi, Registry};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = DaemonConfig::from_env()?;
    let addr = config.addr();

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening at {addr}");

    let registry = Arc::new(Registry::new(config.job_retention));
    let daemon = Daemon::new(listener, JsonApi::new(registry.clone()));
    let shutdown = CancellationToken::new();

    let mut daemon_task = tokio::spawn(daemon.run(shutdown.clone()));

    let res = tokio::select! {
        res = &mut daemon_task => res,
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, tearing services down");
            shutdown.cancel();
            daemon_task.await
        }
    };

    registry.shutdown().await;
    info!("wrapping up");

    res??;
    Ok(())
}
