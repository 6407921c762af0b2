//! Registry of live progress channels.
//!
//! Each upload session (keyed by a client-chosen channel id) owns one bounded
//! queue, drained by its WebSocket task. Sends never block and never fail the
//! operation they report on: a full queue drops the event, a closed queue
//! drops the registration.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Events buffered per channel before new ones are dropped.
pub const CHANNEL_CAPACITY: usize = 64;

/// Event pushed to a progress channel, serialized as `{"type": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        message: String,
        progress: u8,
    },
    Complete {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Heartbeat reply
    Pong,
}

/// Receiving end of a registration.
pub struct ProgressChannel {
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

struct Registration {
    connection_id: Uuid,
    sender: mpsc::Sender<ProgressEvent>,
}

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: DashMap<String, Registration>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Replaces (and thereby closes) any previous registration.
    pub fn register(&self, channel_id: &str) -> ProgressChannel {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let connection_id = Uuid::new_v4();

        if self
            .channels
            .insert(
                channel_id.to_string(),
                Registration {
                    connection_id,
                    sender,
                },
            )
            .is_some()
        {
            debug!("Replaced progress channel {}", channel_id);
        } else {
            debug!("Registered progress channel {}", channel_id);
        }

        ProgressChannel {
            connection_id,
            receiver,
        }
    }

    pub fn unregister(&self, channel_id: &str) {
        if self.channels.remove(channel_id).is_some() {
            debug!("Unregistered progress channel {}", channel_id);
        }
    }

    /// Unregister only if the channel still belongs to `connection_id`.
    pub fn unregister_connection(&self, channel_id: &str, connection_id: Uuid) {
        if self
            .channels
            .remove_if(channel_id, |_, reg| reg.connection_id == connection_id)
            .is_some()
        {
            debug!("Unregistered progress channel {}", channel_id);
        }
    }

    pub fn is_registered(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn send(&self, channel_id: Option<&str>, event: ProgressEvent) {
        let Some(channel_id) = channel_id.filter(|id| !id.is_empty()) else {
            return;
        };

        // Clone the sender so no map guard is held across the send.
        let Some((connection_id, sender)) = self
            .channels
            .get(channel_id)
            .map(|reg| (reg.connection_id, reg.sender.clone()))
        else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Progress channel {} is full, dropping event", channel_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister_connection(channel_id, connection_id);
            }
        }
    }

    pub fn send_progress(&self, channel_id: Option<&str>, message: impl Into<String>, percent: u8) {
        self.send(
            channel_id,
            ProgressEvent::Progress {
                message: message.into(),
                progress: percent.min(100),
            },
        );
    }

    pub fn send_complete(
        &self,
        channel_id: Option<&str>,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.send(
            channel_id,
            ProgressEvent::Complete {
                message: message.into(),
                data,
            },
        );
    }

    pub fn send_error(
        &self,
        channel_id: Option<&str>,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        self.send(
            channel_id,
            ProgressEvent::Error {
                message: message.into(),
                error: detail,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let progress = ProgressEvent::Progress {
            message: "Uploading".into(),
            progress: 42,
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"type": "progress", "message": "Uploading", "progress": 42})
        );

        let complete = ProgressEvent::Complete {
            message: "Done".into(),
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({"type": "complete", "message": "Done"})
        );

        let error = ProgressEvent::Error {
            message: "Failed".into(),
            error: Some("boom".into()),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type": "error", "message": "Failed", "error": "boom"})
        );

        assert_eq!(serde_json::to_value(ProgressEvent::Pong).unwrap(), json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn test_send_reaches_registered_channel() {
        let broadcaster = ProgressBroadcaster::new();
        let mut channel = broadcaster.register("c1");

        broadcaster.send_progress(Some("c1"), "half", 50);
        broadcaster.send_complete(Some("c1"), "done", Some(json!({"n": 1})));

        assert_eq!(
            channel.receiver.recv().await,
            Some(ProgressEvent::Progress {
                message: "half".into(),
                progress: 50
            })
        );
        assert!(matches!(
            channel.receiver.recv().await,
            Some(ProgressEvent::Complete { data: Some(_), .. })
        ));
    }

    #[test]
    fn test_absent_or_unknown_channel_is_noop() {
        let broadcaster = ProgressBroadcaster::new();
        broadcaster.send_progress(None, "x", 1);
        broadcaster.send_progress(Some(""), "x", 1);
        broadcaster.send_error(Some("nobody"), "x", None);
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_closed_channel_is_unregistered() {
        let broadcaster = ProgressBroadcaster::new();
        let channel = broadcaster.register("c1");
        drop(channel);

        broadcaster.send_progress(Some("c1"), "x", 10);
        assert!(!broadcaster.is_registered("c1"));
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let broadcaster = ProgressBroadcaster::new();
        let mut channel = broadcaster.register("c1");

        for i in 0..CHANNEL_CAPACITY + 10 {
            broadcaster.send_progress(Some("c1"), "x", (i % 100) as u8);
        }

        assert!(broadcaster.is_registered("c1"));
        let mut received = 0;
        while channel.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, CHANNEL_CAPACITY);
    }

    #[test]
    fn test_reregistration_replaces_previous() {
        let broadcaster = ProgressBroadcaster::new();
        let old = broadcaster.register("c1");
        let mut new = broadcaster.register("c1");

        // Old socket closing must not remove the new registration.
        broadcaster.unregister_connection("c1", old.connection_id);
        assert!(broadcaster.is_registered("c1"));

        broadcaster.send_progress(Some("c1"), "x", 5);
        assert!(new.receiver.try_recv().is_ok());

        broadcaster.unregister_connection("c1", new.connection_id);
        assert!(!broadcaster.is_registered("c1"));
    }

    #[test]
    fn test_percent_is_capped() {
        let broadcaster = ProgressBroadcaster::new();
        let mut channel = broadcaster.register("c1");
        broadcaster.send_progress(Some("c1"), "x", 250);
        assert!(matches!(
            channel.receiver.try_recv(),
            Ok(ProgressEvent::Progress { progress: 100, .. })
        ));
    }
}
