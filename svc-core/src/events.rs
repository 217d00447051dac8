//! Event types broadcast by the streaming controller.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `StreamController::subscribe_status` |
//! | `ChunkEvent` | `StreamController::subscribe_chunks` |
//!
//! All events serialize to camelCase JSON so front-ends can forward them
//! verbatim.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle state of the streaming controller.
///
/// ```text
/// Idle → Starting → Running → Stopping → Idle
///                      └──► Error → Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session; devices released.
    Idle,
    /// Validating config, loading the model, opening devices.
    Starting,
    /// Audio is flowing through the pipeline.
    Running,
    /// Stop requested; draining output before releasing devices.
    Stopping,
    /// The session halted on an inference or device failure.
    Error,
}

impl SessionStatus {
    /// True while a worker owns (or is acquiring) the audio devices.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Emitted whenever the controller changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Per-chunk events
// ---------------------------------------------------------------------------

/// Emitted once per block written to the output ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    /// Sequence index of the chunk (gaps mean dropped chunks).
    pub seq: u64,
    /// Wall time spent converting the chunk.
    pub latency_ms: f32,
    /// Real-time budget for one chunk: block plus both paddings, without
    /// the crossfade overlap.
    pub budget_ms: f32,
    /// RMS level of the input core.
    pub input_rms: f32,
    /// RMS level of the emitted block.
    pub output_rms: f32,
    /// Stale chunks discarded before this one.
    pub dropped: u64,
    /// Output bypassed inference.
    pub passthrough: bool,
}

impl ChunkEvent {
    pub fn over_budget(&self) -> bool {
        self.latency_ms > self.budget_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Starting,
            detail: Some("loading model".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "starting");
        assert_eq!(json["detail"], "loading model");

        let back: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(back.status, SessionStatus::Starting);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionStatus>(r#""Running""#).is_err());
        assert_eq!(
            serde_json::from_str::<SessionStatus>(r#""error""#).unwrap(),
            SessionStatus::Error
        );
    }

    #[test]
    fn active_states() {
        assert!(!SessionStatus::Idle.is_active());
        assert!(SessionStatus::Starting.is_active());
        assert!(SessionStatus::Running.is_active());
        assert!(SessionStatus::Stopping.is_active());
        assert!(!SessionStatus::Error.is_active());
    }

    #[test]
    fn chunk_event_serializes_with_camel_case_fields() {
        let event = ChunkEvent {
            seq: 12,
            latency_ms: 410.0,
            budget_ms: 600.0,
            input_rms: 0.2,
            output_rms: 0.18,
            dropped: 1,
            passthrough: false,
        };
        assert!(!event.over_budget());

        let json = serde_json::to_value(&event).expect("serialize chunk event");
        assert_eq!(json["seq"], 12);
        assert_eq!(json["dropped"], 1);
        assert_eq!(json["passthrough"], false);
        let latency = json["latencyMs"].as_f64().expect("latencyMs is a number");
        assert!((latency - 410.0).abs() < 1e-3);
        assert!(json["outputRms"].is_number());
    }
}
