//! Start/abort control surface.
//!
//! Every caller (web handler, trigger button, CLI) goes through
//! [`apply_intent`] and gets the same `{ok, message}` answer.

use crate::acquisition::AcquisitionEngine;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Operator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlIntent {
    /// Begin a run with the current preferences
    Start,
    /// Cancel the active run
    Abort,
}

/// Outcome reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the intent took effect
    pub ok: bool,
    /// Human readable reason
    pub message: String,
}

impl ControlResponse {
    fn new(ok: bool, message: impl Into<String>) -> Self {
        Self {
            ok,
            message: message.into(),
        }
    }
}

/// Apply `intent` to `engine`.
pub async fn apply_intent(engine: &AcquisitionEngine, intent: ControlIntent) -> ControlResponse {
    match intent {
        ControlIntent::Start => match engine.start().await {
            Ok(()) => ControlResponse::new(true, "Measurement started"),
            Err(e) => ControlResponse::new(false, e.to_string()),
        },
        ControlIntent::Abort => {
            if !engine.is_running() {
                return ControlResponse::new(false, "No active measurement");
            }
            engine.stop().await;
            info!("abort applied");
            ControlResponse::new(true, "Abort signal sent")
        }
    }
}
