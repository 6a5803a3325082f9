//! Progress events threaded through resolution and container calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Send side of the progress channel handed to every resolution and container call.
pub type EventSender = UnboundedSender<Event>;

/// A single progress notification, correlated to the call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the op or container call the event belongs to.
    pub call_id: String,
    /// What happened.
    pub kind: EventKind,
}

/// Kinds of progress emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// A remote fetch for a package reference began.
    DataPullStarted { data_ref: String },
    /// A remote fetch for a package reference finished successfully.
    DataPullCompleted { data_ref: String },
    /// A line of progress reported while pulling a container image.
    ImagePullProgress { image_ref: String, message: String },
    /// A container was started.
    ContainerStarted { container_id: String },
    /// A container left the running state.
    ContainerExited { container_id: String, exit_code: i64 },
}

impl Event {
    pub fn new(call_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            call_id: call_id.into(),
            kind,
        }
    }
}

/// Publish an event, ignoring a closed receiver.
///
/// Progress reporting is advisory: a caller that stopped listening must not
/// turn into a failed resolution or container run.
pub fn publish(events: &EventSender, call_id: &str, kind: EventKind) {
    let _ = events.send(Event::new(call_id, kind));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_publish_delivers_event_with_call_id() {
        let (sender, mut receiver) = unbounded_channel();
        publish(
            &sender,
            "call-1",
            EventKind::DataPullStarted {
                data_ref: "example.org/pkg#1.0.0".into(),
            },
        );

        let event = receiver.try_recv().expect("event delivered");
        assert_eq!(event.call_id, "call-1");
        assert!(matches!(event.kind, EventKind::DataPullStarted { ref data_ref } if data_ref == "example.org/pkg#1.0.0"));
    }

    #[test]
    fn test_publish_ignores_closed_receiver() {
        let (sender, receiver) = unbounded_channel();
        drop(receiver);
        publish(
            &sender,
            "call-1",
            EventKind::ContainerStarted {
                container_id: "abc".into(),
            },
        );
    }

    #[test]
    fn test_event_kind_serializes_with_type_tag() {
        let kind = EventKind::ContainerExited {
            container_id: "abc".into(),
            exit_code: 3,
        };
        let json = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(json["type"], "containerExited");
        assert_eq!(json["exit_code"], 3);
    }
}
