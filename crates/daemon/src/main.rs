// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `imld`: the IML execution daemon.

use iml_daemon::{run_listener, startup, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(log_path: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (dir, file) = match (log_path.parent(), log_path.file_name()) {
        (Some(dir), Some(file)) => (dir.to_path_buf(), file.to_os_string()),
        _ => return None,
    };
    let appender = tracing_appender::rolling::never(dir, file);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config_path = std::env::var_os("IML_CONFIG").map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("imld: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.log_path());

    let socket_path = config.socket_path();
    let daemon = match startup(config).await {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            eprintln!("imld: startup failed: {e}");
            tracing::error!(error = %e, "startup failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    // Stale socket from an unclean shutdown; the lock file already proved
    // no other instance is live.
    let _ = std::fs::remove_file(&socket_path);
    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("imld: cannot bind {}: {e}", socket_path.display());
            return std::process::ExitCode::FAILURE;
        }
    };
    tracing::info!(socket = %socket_path.display(), "listening");
    println!("READY {}", socket_path.display());

    let shutdown = CancellationToken::new();
    let listener_task = tokio::spawn(run_listener(listener, Arc::clone(&daemon), shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("shutdown requested over the socket");
        }
    }

    shutdown.cancel();
    let _ = listener_task.await;
    daemon.shutdown().await;
    let _ = std::fs::remove_file(&socket_path);
    std::process::ExitCode::SUCCESS
}
