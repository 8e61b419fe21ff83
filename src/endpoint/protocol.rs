//! Streaming endpoint wire types (§4.13). Text frames only — binary frames
//! (client PCM, server synthesized audio) never touch serde and are handled
//! directly by `ws.rs`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Client → server control frame.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../generated/endpoint/ClientFrame.ts")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Start {
        #[ts(type = "string")]
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        language_code: Option<String>,
    },
    Stop,
    Interrupt,
    Vad {
        confidence: f32,
        duration_ms: u64,
    },
    Ping,
}

/// Server → client control frame. Every variant carries a monotonic
/// millisecond timestamp (§4.13 "Every server frame carries a monotonic
/// timestamp").
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../generated/endpoint/ServerFrame.ts")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Connected {
        ts: i64,
        #[ts(type = "string")]
        session_id: Uuid,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    PipelineStarted {
        ts: i64,
        #[ts(type = "string")]
        pipeline_id: Uuid,
    },
    Transcript {
        ts: i64,
        text: String,
        is_final: bool,
        confidence: f32,
    },
    LlmResponse {
        ts: i64,
        text: String,
        is_grounded: Option<bool>,
    },
    Complete {
        ts: i64,
        #[ts(type = "string")]
        pipeline_id: Uuid,
    },
    Interrupted {
        ts: i64,
        #[ts(type = "string")]
        pipeline_id: Uuid,
    },
    PipelineStopped {
        ts: i64,
        #[ts(type = "string")]
        pipeline_id: Uuid,
    },
    Error {
        ts: i64,
        message: String,
    },
    Pong {
        ts: i64,
    },
}

impl ServerFrame {
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_tag_is_kebab_case() {
        let frame = ClientFrame::Vad { confidence: 0.8, duration_ms: 200 };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"vad\""));
    }

    #[test]
    fn start_frame_without_session_id_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Start { session_id: None, .. }));
    }

    #[test]
    fn server_frame_round_trips() {
        let frame = ServerFrame::Pong { ts: ServerFrame::now_ms() };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ServerFrame::Pong { .. }));
    }
}
