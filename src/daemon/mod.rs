//! Daemon mode: serves dubbing sessions over a Unix socket until signalled.

pub mod handler;

use crate::config::Config;
use crate::error::{DubError, Result};
use crate::ipc::server::IpcServer;
use crate::stages::StageSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub use handler::StreamHandler;

/// Runs the daemon with the given stage capabilities.
///
/// `socket_path` overrides the configured socket. Returns after SIGINT or
/// SIGTERM once the socket has been removed.
pub async fn run_daemon(
    config: Config,
    stages: StageSet,
    socket_path: Option<PathBuf>,
) -> Result<()> {
    config.validate()?;

    let socket_path = socket_path.unwrap_or_else(|| config.socket_path());
    let server = Arc::new(IpcServer::new(socket_path));

    info!(
        version = %crate::version_string(),
        socket = %server.socket_path().display(),
        recognizer = stages.recognizer.name(),
        translator = stages.translator.name(),
        synthesizer = stages.synthesizer.name(),
        max_inflight = config.pipeline.max_inflight,
        "Daemon ready"
    );

    let handler = StreamHandler::new(config, stages);
    let running = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { running.start(handler).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                error!("Error setting up signal handler: {}", e);
            }
            info!("Received SIGTERM, shutting down");
        }
        res = &mut server_task => {
            // The accept loop only returns early on a socket error.
            return match res {
                Ok(result) => result,
                Err(e) => Err(DubError::Other(format!("Server task failed: {}", e))),
            };
        }
    }

    server.stop()?;

    match server_task.await {
        Ok(result) => result?,
        Err(e) => error!("Daemon server task failed: {}", e),
    }

    info!("Daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| DubError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_config_is_refused_before_binding() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let mut config = Config::default();
        config.pipeline.max_inflight = 0;

        let result = run_daemon(config, StageSet::loopback(), Some(socket_path.clone())).await;
        assert!(matches!(result, Err(DubError::ConfigInvalidValue { .. })));
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("missing-dir").join("test.sock");

        let result = run_daemon(Config::default(), StageSet::loopback(), Some(socket_path)).await;
        assert!(matches!(result, Err(DubError::IpcSocket { .. })));
    }
}
