//! `JobModel` (spec.md §3): the durable task record the queue persists,
//! reorders, and dispatches to the Ratchet Driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_proto::{CryptoMessage, SignedRatchetMessage};
use uuid::Uuid;

/// Dispatch priority (spec.md §4.D): `urgent > standard > background >
/// delayed`, fixed by this build per the open question in §9.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Delayed = 0,
    Background = 1,
    Standard = 2,
    Urgent = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Standard
    }
}

/// Payload of an inbound job: a signed ratchet envelope just received from
/// the transport (§4.E.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTaskMessage {
    pub message: SignedRatchetMessage,
    pub sender_secret_name: String,
    pub sender_device_id: Uuid,
    pub shared_message_id: Uuid,
}

/// Payload of an outbound job: a plaintext message bound for one peer
/// device identity (§4.E.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundTaskMessage {
    pub recipient_identity: Uuid,
    pub message: CryptoMessage,
    pub shared_id: String,
    pub local_id: Uuid,
}

/// Tagged union over the two job kinds (design note §9 "Tagged unions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskPayload {
    InboundStream(InboundTaskMessage),
    OutboundWrite(OutboundTaskMessage),
}

/// A durable job record as persisted by `SessionStore` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub sequence_id: u64,
    pub task: TaskPayload,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub is_background_task: bool,
    /// Populated only for media jobs (§6.1 "Media jobs"); plain
    /// message jobs leave this `None`.
    pub recipient: Option<Uuid>,
    pub sync_id: Option<Uuid>,
}

impl JobRecord {
    pub fn new_outbound(sequence_id: u64, priority: Priority, task: OutboundTaskMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_id,
            task: TaskPayload::OutboundWrite(task),
            priority,
            scheduled_at: Utc::now(),
            delayed_until: None,
            attempts: 0,
            is_background_task: false,
            recipient: None,
            sync_id: None,
        }
    }

    pub fn new_inbound(sequence_id: u64, priority: Priority, task: InboundTaskMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_id,
            task: TaskPayload::InboundStream(task),
            priority,
            scheduled_at: Utc::now(),
            delayed_until: None,
            attempts: 0,
            is_background_task: false,
            recipient: None,
            sync_id: None,
        }
    }

    pub fn is_delayed_until_future(&self) -> bool {
        matches!(self.delayed_until, Some(t) if t > Utc::now())
    }
}
