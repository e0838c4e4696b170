// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: websocket upgrades, agent fallback endpoints, and the
//! REST boundary of the core.
//!
//! Resource and authorization failures return a 4xx with a stable
//! machine-readable kind; internal error text never crosses the boundary.

use crate::ctx::AppCtx;
use crate::scan::process_scan;
use crate::sockets;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fd_core::{
    command_policy, AuditAction, AuditEntry, Clock, Fault, JobId, MachineId, Role, UserId,
};
use fd_engine::{EventSink, IngestPath};
use fd_secure::SecretManager;
use fd_wire::{
    AgentSecurityEvent, ApiFault, CreateJobRequest, CveStatusView, JobView, ResolveRequest,
    ResolveResponse, ScannedPackage,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Build the full router over the shared context.
pub fn router<C: Clock + 'static>(ctx: Arc<AppCtx<C>>) -> Router {
    Router::new()
        .route("/ws/agent", get(ws_agent))
        .route("/ws/web", get(ws_web))
        .route("/agent/scan", post(agent_scan))
        .route("/agent/scan-progress", post(agent_scan_progress))
        .route("/agent/security-events", post(agent_security_events))
        .route("/agent/audit", post(agent_audit))
        .route("/jobs", post(jobs_create).get(jobs_list))
        .route("/jobs/:id", get(jobs_get))
        .route("/jobs/:id/abort", post(jobs_abort))
        .route("/security/cve", get(cve_status).post(cve_trigger))
        .route("/vms/:id/security/resolve", post(resolve_all).patch(resolve_partial))
        .with_state(ctx)
}

/// Error body carrying the stable fault kind.
#[derive(Debug)]
struct ApiError(Fault);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ApiFault::from(&self.0))).into_response()
    }
}

impl From<Fault> for ApiError {
    fn from(fault: Fault) -> Self {
        Self(fault)
    }
}

// --- websocket upgrades ---

async fn ws_agent<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| sockets::agent::handle_agent_socket(socket, ctx))
}

#[derive(Deserialize)]
struct WsWebQuery {
    token: Option<String>,
}

async fn ws_web<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    Query(query): Query<WsWebQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));
    upgrade.on_upgrade(move |socket| sockets::web::handle_web_socket(socket, ctx, token))
}

// --- agent fallback endpoints (x-agent-secret auth) ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentScanBody {
    machine_id: String,
    summary: fd_core::ScanSummary,
    #[serde(default)]
    packages: Vec<ScannedPackage>,
    #[serde(default)]
    events: Vec<AgentSecurityEvent>,
}

async fn agent_scan<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Json(body): Json<AgentScanBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let machine_id = authenticate_agent(&ctx, &headers, &body.machine_id)?;
    let scan_id = process_scan(&ctx, &machine_id, body.summary, body.packages, body.events)?;
    Ok(Json(serde_json::json!({ "scanId": scan_id.as_str() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentScanProgressBody {
    machine_id: String,
    #[serde(default)]
    percent: u8,
    #[serde(default)]
    stage: String,
}

async fn agent_scan_progress<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Json(body): Json<AgentScanProgressBody>,
) -> Result<StatusCode, ApiError> {
    let machine_id = authenticate_agent(&ctx, &headers, &body.machine_id)?;
    ctx.registry.broadcast_web(&fd_wire::WebServerFrame::ScanProgress {
        machine_id: machine_id.as_str().to_string(),
        percent: body.percent,
        stage: body.stage,
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentEventsBody {
    machine_id: String,
    events: Vec<AgentSecurityEvent>,
}

async fn agent_security_events<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Json(body): Json<AgentEventsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let machine_id = authenticate_agent(&ctx, &headers, &body.machine_id)?;
    let mut stored = 0;
    for event in &body.events {
        if ctx.security.ingest(&machine_id, event, IngestPath::Direct)?.is_some() {
            stored += 1;
        }
    }
    Ok(Json(serde_json::json!({ "stored": stored })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentAuditBody {
    machine_id: String,
    action: String,
    #[serde(default)]
    details: serde_json::Value,
}

async fn agent_audit<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Json(body): Json<AgentAuditBody>,
) -> Result<StatusCode, ApiError> {
    let machine_id = authenticate_agent(&ctx, &headers, &body.machine_id)?;
    ctx.bus.audit(
        AuditEntry::new(parse_agent_action(&body.action), ctx.clock.epoch_ms())
            .with_machine(machine_id)
            .with_details(serde_json::json!({
                "agent_action": body.action,
                "details": body.details,
            })),
    );
    Ok(StatusCode::ACCEPTED)
}

/// Map an agent-supplied action name onto the audit taxonomy. Names that
/// match a stable kind keep it; anything else records as the generic
/// agent-report kind rather than mislabeling the trail.
fn parse_agent_action(name: &str) -> AuditAction {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .unwrap_or(AuditAction::AgentReported)
}

/// Validate the `x-agent-secret` header against the machine's stored
/// hash, with the same normalization rule as registration.
fn authenticate_agent<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    headers: &HeaderMap,
    machine_id: &str,
) -> Result<MachineId, ApiError> {
    let provided = headers
        .get("x-agent-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(Fault::MissingAgentSecret)?;
    let (normalized, _) = SecretManager::normalize_secret(provided);

    let machine_id = MachineId::from_string(machine_id);
    let stored_hash = {
        let state = ctx.state.lock();
        state
            .get_machine(machine_id.as_str())
            .map(|m| m.secret_hash.clone())
            .ok_or(Fault::MachineNotFound)?
    };

    if SecretManager::hash_secret(&normalized) != stored_hash {
        ctx.bus.audit(
            AuditEntry::new(AuditAction::AgentAuthFailed, ctx.clock.epoch_ms())
                .with_machine(machine_id),
        );
        return Err(Fault::InvalidAgentSecret.into());
    }
    Ok(machine_id)
}

// --- orchestrator control ---

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum CreateJobResponse {
    DryRun(fd_wire::DryRunReport),
    Created(fd_core::BulkJob),
}

async fn jobs_create<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let (user_id, role) = authorize_web(&ctx, &headers)?;
    require_operator(&ctx, &user_id, role)?;

    if request.dry_run {
        return Ok(Json(CreateJobResponse::DryRun(ctx.orchestrator.dry_run(&request)?)));
    }

    // Critical-command gate: destructive commands need a fresh re-auth
    // token.
    if let Some(pattern) = command_policy::critical_pattern(&request.command) {
        let now_ms = ctx.clock.epoch_ms();
        let token = request.reauth_token.as_deref().unwrap_or_default();
        if ctx.reauth.lock().check(&user_id, token, now_ms).is_err() {
            ctx.bus.audit(
                AuditEntry::new(AuditAction::ReauthRequired, now_ms)
                    .with_user(user_id)
                    .with_details(serde_json::json!({ "pattern": pattern })),
            );
            return Err(Fault::ReauthRequired.into());
        }
        ctx.bus.audit(
            AuditEntry::new(AuditAction::CriticalCommandDispatched, now_ms)
                .with_user(user_id)
                .with_details(serde_json::json!({ "pattern": pattern })),
        );
    }

    let job = ctx.orchestrator.create_job(&request, user_id)?;
    Ok(Json(CreateJobResponse::Created(job)))
}

#[derive(Deserialize)]
struct JobsListQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    user: Option<String>,
}

async fn jobs_list<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Query(query): Query<JobsListQuery>,
) -> Result<Json<Vec<fd_core::BulkJob>>, ApiError> {
    authorize_web(&ctx, &headers)?;
    let filter = query.user.map(UserId::from_string);
    Ok(Json(ctx.orchestrator.list_jobs(query.limit.unwrap_or(100), filter.as_ref())))
}

async fn jobs_get<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    authorize_web(&ctx, &headers)?;
    let view = ctx
        .orchestrator
        .get_job(&JobId::from_string(&id))
        .ok_or(Fault::JobNotFound)?;
    Ok(Json(view))
}

async fn jobs_abort<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (user_id, role) = authorize_web(&ctx, &headers)?;
    require_operator(&ctx, &user_id, role)?;
    ctx.orchestrator.abort_job(&JobId::from_string(&id), Some(user_id))?;
    Ok(StatusCode::ACCEPTED)
}

// --- CVE mirror ---

async fn cve_status<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
) -> Result<Json<CveStatusView>, ApiError> {
    authorize_web(&ctx, &headers)?;
    Ok(Json(ctx.mirror.status()))
}

async fn cve_trigger<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
) -> Result<Json<CveStatusView>, ApiError> {
    let (user_id, role) = authorize_web(&ctx, &headers)?;
    require_operator(&ctx, &user_id, role)?;

    let mut view = ctx.mirror.status();
    match ctx.mirror.trigger() {
        Ok(()) => {
            view.status = "running".to_string();
            view.accepted = Some(true);
        }
        Err(Fault::AlreadyRunning) => {
            view.status = Fault::AlreadyRunning.kind().to_string();
            view.accepted = Some(false);
        }
        Err(other) => return Err(other.into()),
    }
    Ok(Json(view))
}

// --- security-event resolution ---

async fn resolve_all<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let machine_id = authorize_machine_action(&ctx, &headers, &id)?;
    let resolved = ctx.security.resolve_all(&machine_id)?;
    Ok(Json(ResolveResponse { resolved }))
}

async fn resolve_partial<C: Clock + 'static>(
    State(ctx): State<Arc<AppCtx<C>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let machine_id = authorize_machine_action(&ctx, &headers, &id)?;
    let resolved = ctx.security.resolve_ids(&machine_id, request.ids)?;
    Ok(Json(ResolveResponse { resolved }))
}

// --- shared auth helpers ---

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// JWT auth for the REST surface. Returns the authenticated user and
/// role.
fn authorize_web<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    headers: &HeaderMap,
) -> Result<(UserId, Role), ApiError> {
    let token = bearer_token(headers).ok_or(Fault::SessionInvalid)?;
    let claims = ctx.web_auth.verify(&token)?;
    let user_id = UserId::from_string(&claims.sub);

    let active = ctx
        .state
        .lock()
        .users
        .get(user_id.as_str())
        .map(|u| u.active)
        .unwrap_or(false);
    if !active {
        return Err(Fault::UserNotFound.into());
    }
    Ok((user_id, claims.role))
}

fn require_operator<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    user_id: &UserId,
    role: Role,
) -> Result<(), ApiError> {
    if role.can_operate() {
        return Ok(());
    }
    ctx.bus.audit(
        AuditEntry::new(AuditAction::ForbiddenRole, ctx.clock.epoch_ms()).with_user(*user_id),
    );
    Err(Fault::ForbiddenRole.into())
}

/// Auth plus per-machine access for the resolve endpoints.
fn authorize_machine_action<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    headers: &HeaderMap,
    machine_id: &str,
) -> Result<MachineId, ApiError> {
    let (user_id, role) = authorize_web(ctx, headers)?;
    require_operator(ctx, &user_id, role)?;

    let machine_id = MachineId::from_string(machine_id);
    let state = ctx.state.lock();
    if state.get_machine(machine_id.as_str()).is_none() {
        return Err(Fault::MachineNotFound.into());
    }
    let user = state.users.get(user_id.as_str()).cloned().ok_or(Fault::UserNotFound)?;
    if !state.user_can_access(&user, machine_id.as_str()) {
        drop(state);
        ctx.bus.audit(
            AuditEntry::new(AuditAction::MachineAccessDenied, ctx.clock.epoch_ms())
                .with_user(user_id)
                .with_machine(machine_id),
        );
        return Err(Fault::MachineAccessDenied.into());
    }
    debug!(user = %user_id, machine = %machine_id, "machine action authorized");
    Ok(machine_id)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
