use crate::error::Stage;
use crate::history::{RunId, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted { run_id: RunId },
    StageStarted { run_id: RunId, stage: Stage },
    StageFinished { run_id: RunId, stage: Stage, elapsed_ms: u64 },
    RunFinished { run_id: RunId, status: RunStatus },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards pipeline progress to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { run_id } => info!(run_id = %run_id, "training run started"),
            ProgressEvent::StageStarted { run_id, stage } => info!(run_id = %run_id, stage = %stage, "stage started"),
            ProgressEvent::StageFinished { run_id, stage, elapsed_ms } => {
                info!(run_id = %run_id, stage = %stage, elapsed_ms, "stage finished");
            }
            ProgressEvent::RunFinished { run_id, status: RunStatus::Failed } => {
                warn!(run_id = %run_id, "training run failed");
            }
            ProgressEvent::RunFinished { run_id, status } => {
                info!(run_id = %run_id, status = status.as_str(), "training run finished");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingProgressSink::default();
        let run_id = RunId::parse("run-1").unwrap();
        sink.on_event(ProgressEvent::RunStarted { run_id: run_id.clone() });
        sink.on_event(ProgressEvent::StageStarted { run_id: run_id.clone(), stage: Stage::Ingestion });
        sink.on_event(ProgressEvent::RunFinished { run_id, status: RunStatus::Succeeded });

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], ProgressEvent::StageStarted { stage: Stage::Ingestion, .. }));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProgressEvent::StageFinished {
            run_id: RunId::parse("run-1").unwrap(),
            stage: Stage::Training,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_finished");
        assert_eq!(json["stage"], "training");
    }
}
