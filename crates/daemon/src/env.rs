// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Everything the daemon reads from the process environment, resolved
/// once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub port: u16,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,

    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expires_in: Duration,

    /// Explicit server secret override; generated and persisted when
    /// absent.
    pub session_token_secret: Option<String>,
    pub session_expiry: Duration,

    pub rate_limit_tokens_per_sec: f64,
    pub rate_limit_burst_tokens: f64,
    pub clock_skew_tolerance: Duration,
    pub nonce_history_limit: usize,

    pub cve_sync_interval: Duration,
    pub cve_sync_start_delay: Duration,

    /// Password for the seeded admin account on an empty store.
    pub admin_password: Option<String>,
}

impl Config {
    /// Read the recognized environment set, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_host: var("HOSTNAME").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("PORT").unwrap_or(8420),
            state_dir: state_dir(),
            log_dir: var("FLEETD_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir().join("logs")),

            jwt_issuer: var("JWT_ISSUER").unwrap_or_else(|| "fleetd".to_string()),
            jwt_audience: var("JWT_AUDIENCE").unwrap_or_else(|| "fleetd-web".to_string()),
            jwt_expires_in: Duration::from_secs(parsed("JWT_EXPIRES_IN").unwrap_or(8 * 3600)),

            session_token_secret: var("SESSION_TOKEN_SECRET"),
            session_expiry: Duration::from_secs(parsed("SESSION_EXPIRY_SECONDS").unwrap_or(3600)),

            rate_limit_tokens_per_sec: parsed("RATE_LIMIT_TOKENS_PER_SEC").unwrap_or(50.0),
            rate_limit_burst_tokens: parsed("RATE_LIMIT_BURST_TOKENS").unwrap_or(200.0),
            clock_skew_tolerance: Duration::from_secs(
                parsed("CLOCK_SKEW_TOLERANCE_SECONDS").unwrap_or(30),
            ),
            nonce_history_limit: parsed("NONCE_HISTORY_LIMIT").unwrap_or(4096),

            cve_sync_interval: Duration::from_secs(
                parsed("CVE_SYNC_INTERVAL_SECONDS").unwrap_or(2 * 3600),
            ),
            cve_sync_start_delay: Duration::from_secs(
                parsed("CVE_SYNC_START_DELAY_SECONDS").unwrap_or(30),
            ),

            admin_password: var("FLEETD_ADMIN_PASSWORD"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("events.wal")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("state.snapshot")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.state_dir.join("server.secret")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("fleetd.lock")
    }

    pub fn version_path(&self) -> PathBuf {
        self.state_dir.join("version")
    }
}

/// Resolve state directory: FLEETD_STATE_DIR > XDG_STATE_HOME/fleetd >
/// ~/.local/state/fleetd > /var/lib/fleetd.
fn state_dir() -> PathBuf {
    if let Some(dir) = var("FLEETD_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("fleetd");
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(home).join(".local/state/fleetd");
    }
    PathBuf::from("/var/lib/fleetd")
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|s| s.parse().ok())
}
