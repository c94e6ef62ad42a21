//! Ordered notification log for off-chain observers.
//!
//! The marketplace appends to the log inside the same critical section that
//! commits the state change, so sequence numbers follow commit order. Observers
//! can either page through the log with [`EventLog::events_since`] or follow
//! it live through [`EventLog::subscribe`].

use crate::types::{Hash, TaskId};
use polyneuron_ledger::{AccountAddress, Amount};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default broadcast capacity before lagging subscribers start losing events
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MarketEvent {
    NodeRegistered {
        identity: AccountAddress,
        label: String,
    },
    TaskCreated {
        task_id: TaskId,
        requester: AccountAddress,
        task_type: String,
        reward: Amount,
    },
    TaskAssigned {
        task_id: TaskId,
        assigned_node: AccountAddress,
    },
    TaskResultSubmitted {
        task_id: TaskId,
        result_hash: Hash,
    },
}

impl MarketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeRegistered { .. } => "NodeRegistered",
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskAssigned { .. } => "TaskAssigned",
            Self::TaskResultSubmitted { .. } => "TaskResultSubmitted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log, starting at 1
    pub seq: u64,
    pub timestamp: u64,
    pub event: MarketEvent,
}

pub struct EventLog {
    records: RwLock<Vec<EventRecord>>,
    sender: broadcast::Sender<EventRecord>,
    emitted: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventLog {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Append an event and fan it out to live subscribers.
    pub(crate) async fn append(&self, event: MarketEvent, timestamp: u64) -> u64 {
        let mut records = self.records.write().await;
        let seq = records.len() as u64 + 1;
        let record = EventRecord {
            seq,
            timestamp,
            event,
        };
        records.push(record.clone());
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let event_type = record.event.event_type();
        // No subscribers is fine; the log itself is the source of truth
        match self.sender.send(record) {
            Ok(subscribers) => debug!(seq, event_type, subscribers, "📣 Event emitted"),
            Err(_) => debug!(seq, event_type, "📣 Event logged (no subscribers)"),
        }
        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Records with `seq > after`, in order.
    pub async fn events_since(&self, after: u64) -> Vec<EventRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .skip(after as usize)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<EventRecord> {
        self.events_since(0).await
    }

    pub fn len(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
