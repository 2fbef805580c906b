//! Wire events for the streaming endpoints.
//!
//! Every streaming response is a sequence of `data: <json>\n\n` frames whose
//! payload is one of these variants. The JSON shapes are part of the client
//! contract and must not change.

use serde::{Deserialize, Serialize};

use crate::models::{EventKind, JobEvent};

/// One event on a job's log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event on a streaming submit: the id the client can reconnect with.
    JobId { job_id: String },
    /// One chunk of container output. Chunks are not guaranteed to be whole lines.
    Log { data: String },
    /// Always the last event on a stream.
    Complete { success: bool },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

impl From<&JobEvent> for StreamEvent {
    fn from(event: &JobEvent) -> Self {
        match event.kind {
            EventKind::Log => Self::Log {
                data: event.data.clone().unwrap_or_default(),
            },
            EventKind::Complete => Self::Complete {
                success: event.success.unwrap_or(false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes_are_stable() {
        let job_id = StreamEvent::JobId {
            job_id: "abc".into(),
        };
        assert_eq!(
            serde_json::to_string(&job_id).unwrap(),
            r#"{"type":"job_id","job_id":"abc"}"#
        );

        let log = StreamEvent::Log {
            data: "1 passed\n".into(),
        };
        assert_eq!(
            serde_json::to_string(&log).unwrap(),
            r#"{"type":"log","data":"1 passed\n"}"#
        );

        let done = StreamEvent::Complete { success: true };
        assert_eq!(
            serde_json::to_string(&done).unwrap(),
            r#"{"type":"complete","success":true}"#
        );
    }

    #[test]
    fn log_payload_never_contains_raw_newlines() {
        // SSE frames break on bare newlines; JSON escaping keeps the frame intact.
        let encoded = serde_json::to_string(&StreamEvent::Log {
            data: "line one\nline two\n".into(),
        })
        .unwrap();
        assert!(!encoded.contains('\n'));
    }

    #[test]
    fn persisted_events_convert_to_wire_events() {
        let event = JobEvent::log("Container lost during execution");
        assert_eq!(
            StreamEvent::from(&event),
            StreamEvent::Log {
                data: "Container lost during execution".into()
            }
        );

        let event = JobEvent::complete(false);
        assert_eq!(
            StreamEvent::from(&event),
            StreamEvent::Complete { success: false }
        );
    }
}
