//! Pub/sub event bus for file lifecycle events.
//!
//! Single publisher (admin), many subscribers (query today). Delivery is
//! at-least-once from the consumer's point of view: a slow subscriber can lag
//! and lose messages, which it must repair via the operator-triggered full
//! rebuild from the authoritative file registry.

use filegrid_core::{EventKind, FileEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-backed bus with one channel per event kind.
pub struct EventBus {
    created: broadcast::Sender<FileEvent>,
    updated: broadcast::Sender<FileEvent>,
    deleted: broadcast::Sender<FileEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (created, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (updated, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (deleted, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            created,
            updated,
            deleted,
        }
    }

    fn channel(&self, kind: EventKind) -> &broadcast::Sender<FileEvent> {
        match kind {
            EventKind::Created => &self.created,
            EventKind::Updated => &self.updated,
            EventKind::Deleted => &self.deleted,
        }
    }

    /// Publish to the channel matching the event kind. Returns the number of
    /// subscribers that received it; zero subscribers is not an error.
    pub fn publish(&self, event: FileEvent) -> usize {
        let kind = event.event_type;
        let file_id = event.file_id;
        match self.channel(kind).send(event) {
            Ok(receivers) => {
                debug!(channel = kind.channel(), %file_id, receivers, "event published");
                receivers
            }
            Err(_) => {
                debug!(channel = kind.channel(), %file_id, "event published with no subscribers");
                0
            }
        }
    }

    /// Subscribe to a single channel.
    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<FileEvent> {
        self.channel(kind).subscribe()
    }

    /// Subscribe to all three channels at once.
    pub fn subscribe_all(&self) -> EventStream {
        EventStream::new(
            self.created.subscribe(),
            self.updated.subscribe(),
            self.deleted.subscribe(),
        )
    }

    /// Live subscriber count across all channels, used by health checks.
    pub fn subscriber_count(&self) -> usize {
        self.created.receiver_count() + self.updated.receiver_count() + self.deleted.receiver_count()
    }
}

/// Merged subscription over the three lifecycle channels.
pub struct EventStream {
    created: broadcast::Receiver<FileEvent>,
    updated: broadcast::Receiver<FileEvent>,
    deleted: broadcast::Receiver<FileEvent>,
    created_open: bool,
    updated_open: bool,
    deleted_open: bool,
}

impl EventStream {
    fn new(
        created: broadcast::Receiver<FileEvent>,
        updated: broadcast::Receiver<FileEvent>,
        deleted: broadcast::Receiver<FileEvent>,
    ) -> Self {
        Self {
            created,
            updated,
            deleted,
            created_open: true,
            updated_open: true,
            deleted_open: true,
        }
    }

    /// Receive the next event from any channel.
    ///
    /// A lagged receiver logs how much it missed and keeps going — the missed
    /// span is repaired by a full rebuild, not by replay. Returns None only
    /// when every channel is closed (the bus was dropped).
    pub async fn next(&mut self) -> Option<FileEvent> {
        use broadcast::error::RecvError;
        loop {
            let received = tokio::select! {
                event = self.created.recv(), if self.created_open => ("file:created", event),
                event = self.updated.recv(), if self.updated_open => ("file:updated", event),
                event = self.deleted.recv(), if self.deleted_open => ("file:deleted", event),
                else => return None,
            };
            match received {
                (_, Ok(event)) => return Some(event),
                (channel, Err(RecvError::Lagged(missed))) => {
                    warn!(channel, missed, "event subscriber lagged; rebuild required to recover");
                    continue;
                }
                (channel, Err(RecvError::Closed)) => {
                    debug!(channel, "event channel closed");
                    match channel {
                        "file:created" => self.created_open = false,
                        "file:updated" => self.updated_open = false,
                        _ => self.deleted_open = false,
                    }
                    if !self.created_open && !self.updated_open && !self.deleted_open {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use filegrid_core::{FileRecord, RetentionPolicy};
    use uuid::Uuid;

    fn record(file_id: Uuid) -> FileRecord {
        FileRecord {
            file_id,
            original_filename: "report.pdf".into(),
            storage_filename: "report_user_20260101T000000_x.pdf".into(),
            file_size: 3,
            checksum_sha256: "ab".into(),
            content_type: "application/pdf".into(),
            retention_policy: RetentionPolicy::Temporary,
            ttl_expires_at: Some(Utc::now()),
            finalized_at: None,
            storage_element_id: "se-1".into(),
            storage_path: "2026/01/01/00".into(),
            uploaded_by: "user".into(),
            description: None,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_merged_subscriber() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe_all();
        let file_id = Uuid::new_v4();
        bus.publish(FileEvent::created(record(file_id)));
        let event = stream.next().await.unwrap();
        assert_eq!(event.file_id, file_id);
        assert_eq!(event.event_type, EventKind::Created);
    }

    #[tokio::test]
    async fn delete_events_arrive_without_metadata() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe_all();
        let file_id = Uuid::new_v4();
        bus.publish(FileEvent::deleted(file_id, "se-1"));
        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventKind::Deleted);
        assert!(event.metadata.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(FileEvent::deleted(Uuid::new_v4(), "se-1")), 0);
    }
}
