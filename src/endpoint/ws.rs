//! Streaming endpoint (§4.13): one bidirectional WebSocket per client
//! session, carrying interleaved JSON control frames and binary audio.

use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Duration as ChronoDuration;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::asr::{AsrStreamConfig, Encoding};
use crate::endpoint::protocol::{ClientFrame, ServerFrame};
use crate::endpoint::AppState;
use crate::orchestrator::interrupt::VadEvent;
use crate::orchestrator::pipeline::PipelineEvent;
use crate::session::SessionStatus;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_HEARTBEATS: u32 = 2;
const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn ws_upgrade(State(state): State<AppState>, Query(query): Query<StreamQuery>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn asr_config(language_code: Option<String>) -> AsrStreamConfig {
    AsrStreamConfig {
        language_code: language_code.unwrap_or_else(|| "en-US".to_string()),
        sample_rate: 16_000,
        encoding: Encoding::Linear16,
    }
}

async fn send_frame(sender: &mut (impl SinkExt<Message> + Unpin), frame: ServerFrame) {
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = sender.send(Message::Text(json)).await;
    }
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: reason.into() }))
}

/// Maps the connection to the `{sessionId, userId, currentPipelineId?,
/// aliveFlag}` record from §4.13. `alive` tracks missed heartbeat rounds;
/// two in a row terminates the connection.
async fn handle_socket(socket: WebSocket, state: AppState, query: StreamQuery) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match state.auth.verify(&query.token).await {
        Ok(id) => id,
        Err(_) => {
            let _ = sender.send(close(4001, "auth failure")).await;
            return;
        }
    };

    let session = match query.session_id.as_deref().map(Uuid::parse_str) {
        Some(Ok(id)) => match state.sessions.get_session(id) {
            Ok(s) => s,
            Err(_) => {
                let _ = sender.send(close(4004, "session not found")).await;
                return;
            }
        },
        Some(Err(_)) => {
            let _ = sender.send(close(4004, "session not found")).await;
            return;
        }
        None => state.sessions.create_session(user_id.clone(), serde_json::json!({}), ChronoDuration::minutes(SESSION_TTL_MINUTES)),
    };
    let _ = state.sessions.update_status(session.id, SessionStatus::Active);
    info!(session_id = %session.id, %user_id, "stream connected");

    send_frame(&mut sender, ServerFrame::Connected { ts: ServerFrame::now_ms(), session_id: session.id, expires_at: session.expires_at })
        .await;

    let mut current_pipeline: Option<Uuid> = None;
    let mut pipeline_events: Option<tokio::sync::mpsc::Receiver<PipelineEvent>> = None;
    let mut missed_heartbeats = 0u32;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut shutdown = state.shutdown.clone();

    loop {
        let next_event = async {
            match pipeline_events.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sender.send(close(1001, "server shutdown")).await;
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                    let _ = sender.send(close(1000, "heartbeat timeout")).await;
                    break;
                }
                missed_heartbeats += 1;
                let _ = sender.send(Message::Ping(Vec::new())).await;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &session, &user_id, &mut current_pipeline, &mut pipeline_events, &mut sender, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(id) = current_pipeline {
                            if let Err(e) = state.orchestrator.process_audio_chunk(id, &bytes).await {
                                send_frame(&mut sender, ServerFrame::Error { ts: ServerFrame::now_ms(), message: e.to_string() }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_heartbeats = 0;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Close(None))) => {}
                    Some(Ok(Message::Close(Some(_)))) | None => break,
                    Some(Err(e)) => {
                        warn!(session_id = %session.id, error = %e, "stream read error");
                        break;
                    }
                }
            }
            event = next_event => {
                match event {
                    Some(PipelineEvent::Started) => {}
                    Some(PipelineEvent::Transcript(t)) => {
                        send_frame(&mut sender, ServerFrame::Transcript { ts: ServerFrame::now_ms(), text: t.text, is_final: t.is_final, confidence: t.confidence }).await;
                    }
                    Some(PipelineEvent::LlmToken(_)) => {
                        // Streamed internally only; the wire protocol's llm-response frame
                        // carries the assembled reply, not per-token deltas (§4.13).
                    }
                    Some(PipelineEvent::LlmResponse { text, is_grounded }) => {
                        send_frame(&mut sender, ServerFrame::LlmResponse { ts: ServerFrame::now_ms(), text, is_grounded }).await;
                    }
                    Some(PipelineEvent::TtsAudio(samples)) => {
                        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                        let _ = sender.send(Message::Binary(bytes)).await;
                    }
                    Some(PipelineEvent::Completed) => {
                        if let Some(id) = current_pipeline.take() {
                            send_frame(&mut sender, ServerFrame::Complete { ts: ServerFrame::now_ms(), pipeline_id: id }).await;
                        }
                        pipeline_events = None;
                    }
                    Some(PipelineEvent::Interrupted) => {
                        if let Some(id) = current_pipeline.take() {
                            send_frame(&mut sender, ServerFrame::Interrupted { ts: ServerFrame::now_ms(), pipeline_id: id }).await;
                        }
                        pipeline_events = None;
                    }
                    Some(PipelineEvent::Error(message)) => {
                        current_pipeline = None;
                        pipeline_events = None;
                        send_frame(&mut sender, ServerFrame::Error { ts: ServerFrame::now_ms(), message }).await;
                    }
                    None => pipeline_events = None,
                }
            }
        }
    }

    // Unclean close: whatever pipeline is still active is cancelled (§4.13).
    if let Some(id) = current_pipeline {
        let _ = state.orchestrator.interrupt_pipeline(id).await;
    }
    let _ = state.sessions.update_status(session.id, SessionStatus::Completed);
    info!(session_id = %session.id, "stream disconnected");
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_frame(
    state: &AppState,
    session: &crate::session::Session,
    user_id: &str,
    current_pipeline: &mut Option<Uuid>,
    pipeline_events: &mut Option<tokio::sync::mpsc::Receiver<PipelineEvent>>,
    sender: &mut (impl SinkExt<Message> + Unpin),
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            send_frame(sender, ServerFrame::Error { ts: ServerFrame::now_ms(), message: format!("malformed frame: {e}") }).await;
            return;
        }
    };

    match frame {
        ClientFrame::Ping => {
            send_frame(sender, ServerFrame::Pong { ts: ServerFrame::now_ms() }).await;
        }
        ClientFrame::Start { language_code, .. } => {
            match state.orchestrator.start_pipeline(session.id, user_id.to_string(), asr_config(language_code)).await {
                Ok((pipeline_id, rx)) => {
                    *current_pipeline = Some(pipeline_id);
                    *pipeline_events = Some(rx);
                    send_frame(sender, ServerFrame::PipelineStarted { ts: ServerFrame::now_ms(), pipeline_id }).await;
                }
                Err(e) => {
                    send_frame(sender, ServerFrame::Error { ts: ServerFrame::now_ms(), message: e.to_string() }).await;
                }
            }
        }
        ClientFrame::Stop => {
            if let Some(id) = current_pipeline.take() {
                let _ = state.orchestrator.end_pipeline(id).await;
                *pipeline_events = None;
                send_frame(sender, ServerFrame::PipelineStopped { ts: ServerFrame::now_ms(), pipeline_id: id }).await;
            }
        }
        ClientFrame::Interrupt => {
            if let Some(id) = *current_pipeline {
                if let Err(e) = state.interrupts.manual_interrupt(id, Instant::now()).await {
                    send_frame(sender, ServerFrame::Error { ts: ServerFrame::now_ms(), message: e.to_string() }).await;
                }
            }
        }
        ClientFrame::Vad { confidence, duration_ms } => {
            if let Some(id) = *current_pipeline {
                let _ = state.interrupts.handle_vad_event(id, VadEvent { confidence, duration_ms }, Instant::now()).await;
            }
        }
    }
}
