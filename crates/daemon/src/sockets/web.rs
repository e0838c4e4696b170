// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Web-client socket manager.
//!
//! Browser sockets are JWT-authorized before the upgrade completes.
//! Client frames relay into the terminal service or trigger a scan;
//! broadcasts arrive through the registry's sender map.

use crate::ctx::AppCtx;
use crate::registry::{SocketCommand, WebHandle};
use axum::extract::ws::{Message, WebSocket};
use fd_core::{AuditAction, AuditEntry, Clock, Fault, SessionId, UserId};
use fd_engine::EventSink;
use fd_wire::WebClientFrame;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn handle_web_socket<C: Clock + 'static>(
    socket: WebSocket,
    ctx: Arc<AppCtx<C>>,
    token: Option<String>,
) {
    let (mut writer, mut reader) = socket.split();

    // Authorize before anything else flows.
    let claims = match token.as_deref().map(|t| ctx.web_auth.verify(t)) {
        Some(Ok(claims)) => claims,
        _ => {
            ctx.bus.audit(AuditEntry::new(AuditAction::WebAuthFailed, ctx.clock.epoch_ms()));
            let _ = writer
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: axum::extract::ws::close_code::POLICY,
                    reason: Fault::SessionInvalid.kind().into(),
                })))
                .await;
            return;
        }
    };

    let user_id = UserId::from_string(&claims.sub);
    let user_active = ctx
        .state
        .lock()
        .users
        .get(user_id.as_str())
        .map(|u| u.active)
        .unwrap_or(false);
    if !user_active {
        warn!(user = %user_id, "web socket for unknown or inactive user");
        let _ = writer
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::POLICY,
                reason: Fault::UserNotFound.kind().into(),
            })))
            .await;
        return;
    }

    let client_id = uuid::Uuid::new_v4().to_string();
    let (sender, mut outbound) = mpsc::unbounded_channel::<SocketCommand>();
    ctx.registry.register_web(WebHandle {
        client_id: client_id.clone(),
        user_id,
        role: claims.role,
        sender,
    });
    info!(client = %client_id, user = %user_id, "web client connected");

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if writer.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(SocketCommand::Close(reason)) => {
                    let _ = writer
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code: axum::extract::ws::close_code::POLICY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },

            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WebClientFrame>(&text) {
                        Ok(frame) => handle_client_frame(&ctx, &client_id, &user_id, frame),
                        Err(_) => {
                            debug!(client = %client_id, "malformed web frame dropped");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client = %client_id, error = %e, "web socket error");
                    break;
                }
            },
        }
    }

    ctx.registry.unregister_web(&client_id);
    ctx.terminals.close_for_web_client(&client_id);
    info!(client = %client_id, "web client disconnected");
}

fn handle_client_frame<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    client_id: &str,
    user_id: &UserId,
    frame: WebClientFrame,
) {
    match frame {
        WebClientFrame::SpawnTerminal { machine_id, cols, rows } => {
            if let Err(fault) = ctx.terminals.spawn(
                client_id,
                user_id,
                &machine_id.as_str().into(),
                cols,
                rows,
            ) {
                debug!(client = client_id, kind = fault.kind(), "spawn_terminal rejected");
            }
        }

        WebClientFrame::TerminalInput { session_id, data } => {
            if let Err(fault) =
                ctx.terminals.input(client_id, &SessionId::from_string(&session_id), &data)
            {
                debug!(client = client_id, kind = fault.kind(), "terminal_input rejected");
            }
        }

        WebClientFrame::TerminalResize { session_id, cols, rows } => {
            if let Err(fault) = ctx.terminals.resize(
                client_id,
                &SessionId::from_string(&session_id),
                cols,
                rows,
            ) {
                debug!(client = client_id, kind = fault.kind(), "terminal_resize rejected");
            }
        }

        WebClientFrame::TriggerScan { machine_id } => {
            // Unsigned nudge; the scan result itself comes back through
            // the normal scan pipeline.
            let target = machine_id.as_str().into();
            if ctx
                .registry
                .send_agent_text(&target, r#"{"type":"trigger_scan"}"#.to_string())
                .is_err()
            {
                debug!(machine = %machine_id, "trigger_scan for offline agent dropped");
            }
        }
    }
}
