// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleetd: the fleet control-plane daemon.

use fd_daemon::{env::Config, lifecycle};
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let config = Config::from_env();

    // File logging with daily rotation plus stderr; RUST_LOG filters both.
    let _ = std::fs::create_dir_all(&config.log_dir);
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "fleetd.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let daemon = match lifecycle::startup(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "startup failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "runtime initialization failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(lifecycle::run(daemon)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}
