// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against an in-process fleetd.
//!
//! The server runs on an ephemeral port; these tests act as the agents
//! (over real WebSockets, verifying envelopes the way an agent would) and
//! as the browser (REST + web socket).

use fd_core::{Clock, Event, Fault, MachineStatus, Role, SystemClock, User, UserId};
use fd_daemon::ctx::AppCtx;
use fd_daemon::env::Config;
use fd_engine::EventSink;
use fd_secure::{SecretManager, Verifier, VerifierConfig};
use fd_storage::{MaterializedState, Wal};
use fd_wire::SecureEnvelope;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;

const SERVER_SECRET: &str = "server-secret-for-specs";

struct TestServer {
    ctx: Arc<AppCtx<SystemClock>>,
    addr: SocketAddr,
    admin_token: String,
    _state_dir: TempDir,
}

async fn start_server() -> TestServer {
    let state_dir = TempDir::new().unwrap();
    let config = Config {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        state_dir: state_dir.path().to_path_buf(),
        log_dir: state_dir.path().join("logs"),
        jwt_issuer: "fleetd-spec".to_string(),
        jwt_audience: "fleetd-spec-web".to_string(),
        jwt_expires_in: Duration::from_secs(3600),
        session_token_secret: Some(SERVER_SECRET.to_string()),
        session_expiry: Duration::from_secs(3600),
        rate_limit_tokens_per_sec: 50.0,
        rate_limit_burst_tokens: 200.0,
        clock_skew_tolerance: Duration::from_secs(30),
        nonce_history_limit: 4096,
        cve_sync_interval: Duration::from_secs(7200),
        cve_sync_start_delay: Duration::from_secs(7200),
        admin_password: None,
    };

    let wal = Wal::open(&config.wal_path(), 0).unwrap();
    let secrets = SecretManager::from_secret(SERVER_SECRET);
    let ctx = AppCtx::build(config, SystemClock, wal, MaterializedState::default(), secrets);

    // Seed the operator the browser-side tests act as.
    let admin_id = UserId::from_string("usr-admin");
    ctx.bus
        .emit(Event::UserCreated {
            user: User {
                id: admin_id,
                username: "admin".to_string(),
                password_hash: String::new(),
                role: Role::Admin,
                active: true,
                created_at_ms: 0,
            },
        })
        .unwrap();
    let admin_token = ctx
        .web_auth
        .issue(&admin_id, Role::Admin, SystemClock.epoch_secs())
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = fd_daemon::http::router(Arc::clone(&ctx));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestServer { ctx, addr, admin_token, _state_dir: state_dir }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// An agent connection driven by the test.
struct AgentClient {
    ws: WsStream,
}

impl AgentClient {
    async fn connect(server: &TestServer, machine_id: &str, secret: &str) -> Self {
        let url = format!("ws://{}/ws/agent", server.addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut client = Self { ws };
        client
            .send_json(&json!({
                "type": "register",
                "machineId": machine_id,
                "hostname": format!("{}-host", machine_id),
                "ip": "10.0.0.9",
                "osInfo": "Debian GNU/Linux 12",
                "secretKey": secret,
            }))
            .await;
        client
    }

    async fn send_json(&mut self, value: &Value) {
        self.ws.send(Message::text(value.to_string())).await.unwrap();
    }

    /// Next text frame as JSON, skipping transport noise.
    async fn next_json(&mut self) -> Option<Value> {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(&text).ok();
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Err(_) => return None,
            }
        }
    }
}

/// A browser connection driven by the test.
struct WebClient {
    ws: WsStream,
}

impl WebClient {
    async fn connect(server: &TestServer) -> Self {
        let url = format!("ws://{}/ws/web?token={}", server.addr, server.admin_token);
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        Self { ws }
    }

    async fn send_json(&mut self, value: &Value) {
        self.ws.send(Message::text(value.to_string())).await.unwrap();
    }

    /// Wait for a frame of the given type, discarding others.
    async fn expect_frame(&mut self, frame_type: &str) -> Value {
        for _ in 0..200 {
            match tokio::time::timeout(Duration::from_secs(10), self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == frame_type {
                        return value;
                    }
                }
                Ok(Some(Ok(_))) => continue,
                other => panic!("web socket ended while waiting for {frame_type}: {other:?}"),
            }
        }
        panic!("no {frame_type} frame arrived");
    }
}

fn hex_secret(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

// --- scenario 1: register and heartbeat ---

#[tokio::test]
async fn register_and_heartbeat() {
    let server = start_server().await;
    let mut web = WebClient::connect(&server).await;
    // Give the web socket a beat to finish its handshake before events flow.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let secret = hex_secret('a');
    let mut agent = AgentClient::connect(&server, "m1", &secret).await;

    let frame = web.expect_frame("new_machine").await;
    assert_eq!(frame["machine"]["id"], "m1");
    let frame = web.expect_frame("machine_status_changed").await;
    assert_eq!(frame["status"], "online");

    // The stored hash is SHA-256 of the normalized secret.
    wait_until(|| server.ctx.state.lock().get_machine("m1").is_some(), "machine row").await;
    {
        let state = server.ctx.state.lock();
        let machine = state.get_machine("m1").unwrap();
        assert_eq!(machine.status, MachineStatus::Online);
        assert_eq!(machine.secret_hash, SecretManager::hash_secret(&secret));
    }

    agent.send_json(&json!({ "type": "heartbeat" })).await;
    web.expect_frame("machine_heartbeat").await;
}

#[tokio::test]
async fn register_with_wrong_secret_is_rejected() {
    let server = start_server().await;

    // First registration stores the secret.
    let _agent = AgentClient::connect(&server, "m1", &hex_secret('a')).await;
    wait_until(|| server.ctx.state.lock().get_machine("m1").is_some(), "machine row").await;

    // A second connection with the wrong secret is closed with a policy
    // error and the registry keeps exactly one live socket.
    let mut intruder = AgentClient::connect(&server, "m1", &hex_secret('b')).await;
    assert!(intruder.next_json().await.is_none());
    assert_eq!(server.ctx.registry.agent_count(), 1);
}

#[tokio::test]
async fn second_registration_supersedes_the_first_socket() {
    let server = start_server().await;
    let secret = hex_secret('a');

    let mut first = AgentClient::connect(&server, "m1", &secret).await;
    wait_until(|| server.ctx.registry.agent_count() == 1, "first socket").await;

    let _second = AgentClient::connect(&server, "m1", &secret).await;

    // The first socket is closed by the server; exactly one stays live.
    assert!(first.next_json().await.is_none());
    wait_until(|| server.ctx.registry.agent_count() == 1, "single live socket").await;
}

// --- scenario 2: HMAC envelope and replay defense (agent side) ---

#[tokio::test]
async fn terminal_envelope_replay_is_rejected_by_the_agent() {
    let server = start_server().await;
    let secret = hex_secret('a');
    let mut agent = AgentClient::connect(&server, "m1", &secret).await;
    wait_until(|| server.ctx.registry.agent_count() == 1, "agent connected").await;

    let mut web = WebClient::connect(&server).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    web.send_json(&json!({ "type": "spawn_terminal", "machineId": "m1", "cols": 80, "rows": 24 }))
        .await;

    // The agent receives a verifiable spawn envelope and acks it.
    let spawn: SecureEnvelope =
        serde_json::from_value(agent.next_json().await.unwrap()).unwrap();
    assert_eq!(spawn.msg_type, "spawn_terminal");
    assert!(fd_secure::verify_hmac(&spawn, &secret));
    agent
        .send_json(&json!({
            "type": "terminal_session_created",
            "sessionId": spawn.session_id,
        }))
        .await;
    web.expect_frame("terminal_session_created").await;

    // Keystroke "l" arrives as a signed envelope.
    web.send_json(&json!({
        "type": "terminal_input",
        "sessionId": spawn.session_id,
        "data": "l",
    }))
    .await;
    let input: SecureEnvelope =
        serde_json::from_value(agent.next_json().await.unwrap()).unwrap();
    assert_eq!(input.msg_type, "terminal_input");

    // The agent-side verifier accepts the first delivery and rejects the
    // byte-identical replay one second later with ReplayNonceSeen.
    let mut verifier = Verifier::new(VerifierConfig::default());
    let session = server
        .ctx
        .state
        .lock()
        .sessions
        .get(input.session_id.as_str())
        .cloned()
        .unwrap();
    let now_ms = SystemClock.epoch_ms();
    assert_eq!(verifier.verify(&input, Some(&session), &secret, now_ms), Ok(()));
    assert_eq!(
        verifier.verify(&input, Some(&session), &secret, now_ms + 1_000),
        Err(Fault::ReplayNonceSeen)
    );

    // Terminal output flows back to the browser.
    agent
        .send_json(&json!({
            "type": "terminal_output",
            "sessionId": input.session_id,
            "data": "file-a  file-b\n",
        }))
        .await;
    let frame = web.expect_frame("terminal_output").await;
    assert_eq!(frame["data"], "file-a  file-b\n");
}

// --- scenarios 3 and 4: bulk jobs over REST ---

/// Drive one connected agent: answer every execute_command with the given
/// exit code.
fn spawn_responder(mut agent: AgentClient, exit_code: i32) {
    tokio::spawn(async move {
        while let Some(value) = agent.next_json().await {
            if value["type"] == "execute_command" {
                let command_id = value["payload"]["commandId"].as_str().unwrap_or("").to_string();
                agent
                    .send_json(&json!({
                        "type": "command_completed",
                        "commandId": command_id,
                        "exitCode": exit_code,
                    }))
                    .await;
            }
        }
    });
}

async fn post_job(server: &TestServer, body: Value) -> Value {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/jobs", server.addr))
        .bearer_auth(&server.admin_token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "job create failed: {}", response.status());
    response.json().await.unwrap()
}

async fn get_job(server: &TestServer, job_id: &str) -> Value {
    let client = reqwest::Client::new();
    client
        .get(format!("http://{}/jobs/{}", server.addr, job_id))
        .bearer_auth(&server.admin_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_for_job_status(server: &TestServer, job_id: &str, expected: &str) -> Value {
    for _ in 0..600 {
        let view = get_job(server, job_id).await;
        if view["status"] == expected {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} never reached {expected}");
}

fn execution_status_counts(view: &Value) -> (usize, usize, usize) {
    let executions = view["executions"].as_array().unwrap();
    let count = |status: &str| {
        executions.iter().filter(|e| e["status"] == status).count()
    };
    (count("success"), count("failed"), count("aborted"))
}

#[tokio::test]
async fn parallel_bulk_job_hits_the_failure_threshold() {
    let server = start_server().await;
    let secret = hex_secret('a');

    let mut ids = Vec::new();
    for i in 0..10 {
        let machine_id = format!("mp{}", i);
        let agent = AgentClient::connect(&server, &machine_id, &secret).await;
        spawn_responder(agent, 1); // every target fails
        ids.push(machine_id);
    }
    wait_until(|| server.ctx.registry.agent_count() == 10, "all agents connected").await;

    let created = post_job(
        &server,
        json!({
            "command": "uptime",
            "mode": "parallel",
            "target": { "mode": "adhoc", "ids": ids },
            "strategy": { "concurrency": 3, "stopOnFailurePercent": 50 },
        }),
    )
    .await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let view = wait_for_job_status(&server, &job_id, "failed").await;
    let (success, failed, aborted) = execution_status_counts(&view);
    assert_eq!(success, 0);
    // The threshold trips at 5/10; with up to three in flight the exact
    // failure count depends on completion timing, but every target ends
    // terminal and the pending remainder is aborted.
    assert!(failed >= 5, "threshold never tripped: {failed} failures");
    assert_eq!(failed + aborted, 10);
    assert!(aborted >= 2);
}

#[tokio::test]
async fn rolling_bulk_job_succeeds_in_waves() {
    let server = start_server().await;
    let secret = hex_secret('a');

    let mut ids = Vec::new();
    for i in 0..6 {
        let machine_id = format!("mr{}", i);
        let agent = AgentClient::connect(&server, &machine_id, &secret).await;
        spawn_responder(agent, 0);
        ids.push(machine_id);
    }
    wait_until(|| server.ctx.registry.agent_count() == 6, "all agents connected").await;

    let started = std::time::Instant::now();
    let created = post_job(
        &server,
        json!({
            "command": "apt upgrade -y",
            "mode": "rolling",
            "target": { "mode": "adhoc", "ids": ids },
            "strategy": { "batchSize": 2, "waitSeconds": 1, "stopOnFailurePercent": 100 },
        }),
    )
    .await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let view = wait_for_job_status(&server, &job_id, "success").await;
    let (success, failed, aborted) = execution_status_counts(&view);
    assert_eq!((success, failed, aborted), (6, 0, 0));

    // Three waves of two with two inter-wave pauses of one second.
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn dry_run_reports_without_dispatching() {
    let server = start_server().await;
    let secret = hex_secret('a');
    let _agent = AgentClient::connect(&server, "md1", &secret).await;
    wait_until(|| server.ctx.registry.agent_count() == 1, "agent connected").await;

    let report = post_job(
        &server,
        json!({
            "command": "uptime",
            "mode": "parallel",
            "target": { "mode": "adhoc", "ids": ["md1"] },
            "dryRun": true,
        }),
    )
    .await;
    assert_eq!(report["total"], 1);
    assert_eq!(report["offline"], 0);
    assert!(server.ctx.state.lock().jobs.is_empty());
}

// --- scenario 5: security-event dedup over the fallback endpoint ---

#[tokio::test]
async fn security_event_dedup_and_resolution_preservation() {
    let server = start_server().await;
    let secret = hex_secret('a');
    let _agent = AgentClient::connect(&server, "m1", &secret).await;
    wait_until(|| server.ctx.state.lock().get_machine("m1").is_some(), "machine row").await;

    let client = reqwest::Client::new();
    let post_event = || async {
        client
            .post(format!("http://{}/agent/security-events", server.addr))
            .header("x-agent-secret", &secret)
            .json(&json!({
                "machineId": "m1",
                "events": [{
                    "kind": "failed_auth",
                    "message": "failed ssh auth",
                    "data": { "source_ip": "10.0.0.5" },
                }],
            }))
            .send()
            .await
            .unwrap()
    };

    // Two arrivals dedup into one open row.
    assert!(post_event().await.status().is_success());
    assert!(post_event().await.status().is_success());

    let (row_id, updated_at) = {
        let state = server.ctx.state.lock();
        let rows: Vec<_> = state
            .security_events
            .values()
            .filter(|e| e.fingerprint == "failed_auth:10.0.0.5")
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, fd_core::SecurityEventStatus::Open);
        (rows[0].id, rows[0].updated_at_ms)
    };

    // The operator resolves everything on the machine.
    let response = client
        .post(format!("http://{}/vms/m1/security/resolve", server.addr))
        .bearer_auth(&server.admin_token)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["resolved"], 1);

    // A third arrival updates the row in place but stays resolved.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(post_event().await.status().is_success());
    {
        let state = server.ctx.state.lock();
        let row = state.security_events.get(row_id.as_str()).unwrap();
        assert_eq!(row.status, fd_core::SecurityEventStatus::Resolved);
        assert!(row.updated_at_ms >= updated_at);
        assert_eq!(
            state
                .security_events
                .values()
                .filter(|e| e.fingerprint == "failed_auth:10.0.0.5")
                .count(),
            1
        );
    }
}

// --- scenario 6: CVE mirror concurrency gate ---

#[tokio::test(start_paused = true)]
async fn cve_trigger_while_running_returns_already_running() {
    // Context only; the paused runtime keeps the first sync in flight
    // until this task yields.
    let state_dir = TempDir::new().unwrap();
    let config = Config {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        state_dir: state_dir.path().to_path_buf(),
        log_dir: state_dir.path().join("logs"),
        jwt_issuer: "spec".into(),
        jwt_audience: "spec".into(),
        jwt_expires_in: Duration::from_secs(60),
        session_token_secret: Some(SERVER_SECRET.to_string()),
        session_expiry: Duration::from_secs(60),
        rate_limit_tokens_per_sec: 50.0,
        rate_limit_burst_tokens: 200.0,
        clock_skew_tolerance: Duration::from_secs(30),
        nonce_history_limit: 16,
        cve_sync_interval: Duration::from_secs(7200),
        cve_sync_start_delay: Duration::from_secs(7200),
        admin_password: None,
    };
    let wal = Wal::open(&config.wal_path(), 0).unwrap();
    let ctx = AppCtx::build(
        config,
        SystemClock,
        wal,
        MaterializedState::default(),
        SecretManager::from_secret(SERVER_SECRET),
    );

    let before = ctx.state.lock().cves.len();

    ctx.mirror.trigger().unwrap();
    assert_eq!(ctx.mirror.status().status, "running");
    assert_eq!(ctx.mirror.trigger(), Err(Fault::AlreadyRunning));

    // Let the (empty-fleet) sync finish; the count never decreases.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctx.mirror.status().status, "idle");
    assert!(ctx.state.lock().cves.len() >= before);
}
