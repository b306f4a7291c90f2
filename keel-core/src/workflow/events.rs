//! Session lifecycle events
//!
//! The engine publishes a [`WorkflowEvent`] on a broadcast channel whenever a
//! session is created or begins running, a stage starts or finishes, and a
//! session ends. Slow
//! subscribers miss events rather than stalling the engine.
//!
//! ```rust,ignore
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {:?}", event.session_id, event.kind);
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::result::ErrorCode;
use super::session::{SessionStatus, StepStatus};

/// Event emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: WorkflowEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    SessionStarted,
    /// CREATED to RUNNING
    SessionRunning,
    StageStarted {
        stage: String,
        step: usize,
    },
    StageCompleted {
        stage: String,
        step: usize,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    SessionFinished {
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionRemoved,
}

/// Sending half of the lifecycle channel
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn publish(&self, session_id: &str, kind: WorkflowEventKind) {
        let event = WorkflowEvent {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish("s1", WorkflowEventKind::SessionStarted);
        bus.publish(
            "s1",
            WorkflowEventKind::StageCompleted {
                stage: "image_analyzer".into(),
                step: 0,
                status: StepStatus::Failed,
                error_code: Some(ErrorCode::InputInvalid),
            },
        );

        assert_eq!(rx.recv().await.unwrap().kind, WorkflowEventKind::SessionStarted);
        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stage_completed");
        assert_eq!(json["error_code"], "INPUT_INVALID");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(1);
        bus.publish("s1", WorkflowEventKind::SessionRemoved);
    }
}
