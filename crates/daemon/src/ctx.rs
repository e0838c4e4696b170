// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon context for socket handlers and the HTTP surface.

use crate::auth::WebAuth;
use crate::bus::EventBus;
use crate::env::Config;
use crate::registry::ConnectionRegistry;
use crate::terminal::TerminalService;
use fd_core::Clock;
use fd_engine::{CveMirror, MirrorConfig, Orchestrator, OrchestratorConfig, SecurityEngine};
use fd_secure::{ReauthGate, SecretManager, SessionService, Verifier, VerifierConfig};
use fd_storage::{FleetCache, MaterializedState, Wal};
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything a request handler can reach.
pub struct AppCtx<C: Clock + 'static> {
    pub config: Config,
    pub clock: C,
    pub state: Arc<Mutex<MaterializedState>>,
    pub cache: Arc<Mutex<FleetCache>>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ConnectionRegistry>,
    pub orchestrator: Arc<Orchestrator<C>>,
    pub mirror: Arc<CveMirror<C>>,
    pub security: Arc<SecurityEngine<C>>,
    pub terminals: Arc<TerminalService<C>>,
    pub secrets: SecretManager,
    pub sessions: SessionService,
    pub web_auth: WebAuth,
    pub reauth: Mutex<ReauthGate>,
    /// Envelope verification for signed inbound agent messages.
    pub verifier: Mutex<Verifier>,
}

impl<C: Clock + 'static> AppCtx<C> {
    /// Wire the full component graph over an opened WAL and recovered
    /// state. Used by startup and by integration tests.
    pub fn build(
        config: Config,
        clock: C,
        wal: Wal,
        state: MaterializedState,
        secrets: SecretManager,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(state));
        let cache = Arc::new(Mutex::new(FleetCache::rebuild(&state.lock())));
        let registry = Arc::new(ConnectionRegistry::new());
        let bus = Arc::new(EventBus::new(
            wal,
            Arc::clone(&state),
            Arc::clone(&cache),
            Arc::clone(&registry),
        ));

        let sessions =
            SessionService::new(secrets.clone(), config.session_expiry.as_millis() as u64);
        let web_auth = WebAuth::new(&config, secrets.server_secret());

        let sink: Arc<dyn fd_engine::EventSink> = Arc::clone(&bus) as Arc<dyn fd_engine::EventSink>;
        let dispatch: Arc<dyn fd_engine::Dispatch> =
            Arc::clone(&registry) as Arc<dyn fd_engine::Dispatch>;

        let orchestrator = Orchestrator::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            Arc::clone(&dispatch),
            secrets.clone(),
            sessions.clone(),
            clock.clone(),
            OrchestratorConfig::default(),
        );

        let mirror = CveMirror::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            clock.clone(),
            MirrorConfig {
                sync_interval: config.cve_sync_interval,
                start_delay: config.cve_sync_start_delay,
                ..Default::default()
            },
        );

        let security =
            Arc::new(SecurityEngine::new(Arc::clone(&state), Arc::clone(&sink), clock.clone()));

        let terminals = Arc::new(TerminalService::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            Arc::clone(&registry),
            secrets.clone(),
            sessions.clone(),
            clock.clone(),
            config.rate_limit_tokens_per_sec,
            config.rate_limit_burst_tokens,
        ));

        let verifier = Verifier::new(VerifierConfig {
            clock_skew_tolerance_secs: config.clock_skew_tolerance.as_secs(),
            nonce_history_limit: config.nonce_history_limit,
            rate_limit_tokens_per_sec: config.rate_limit_tokens_per_sec,
            rate_limit_burst: config.rate_limit_burst_tokens,
        });

        Arc::new(Self {
            config,
            clock,
            state,
            cache,
            bus,
            registry,
            orchestrator,
            mirror,
            security,
            terminals,
            secrets,
            sessions,
            web_auth,
            reauth: Mutex::new(ReauthGate::default()),
            verifier: Mutex::new(verifier),
        })
    }
}
