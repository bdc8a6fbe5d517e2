use crate::models::scan::{LinkOutcome, ScanReport, SnapshotRecord};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumer of progress and completion events. Fire-and-forget: no
/// acknowledgement, no delivery guarantee.
pub trait EventSink: Send + 'static {
    fn publish(&self, event: &str, payload: &Value);
}

/// Sink that forwards events to the log. Useful as a default when no
/// transport is wired up.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &str, payload: &Value) {
        info!(event, %payload, "event");
    }
}

/// Persistence contract consumed by the pipeline. Implementations own their
/// connection; calls arrive serialized on the router task.
pub trait Storage: Send + 'static {
    fn save_snapshot(
        &mut self,
        serial: &str,
        report: &ScanReport,
        duration_ms: u64,
        raw_text: &str,
        game_id: Option<&str>,
    ) -> Result<i64, String>;

    fn link_or_queue_account(
        &mut self,
        serial: &str,
        game_id: &str,
        display_name: &str,
        snapshot_id: i64,
    ) -> Result<LinkOutcome, String>;

    fn query_history(&self, serial: Option<&str>, limit: usize) -> Vec<SnapshotRecord>;
}

enum OutboundMessage {
    Publish {
        event: String,
        payload: Value,
    },
    SaveSnapshot {
        serial: String,
        report: ScanReport,
        duration_ms: u64,
        raw_text: String,
        game_id: Option<String>,
        reply: oneshot::Sender<Result<i64, String>>,
    },
    LinkAccount {
        serial: String,
        game_id: String,
        display_name: String,
        snapshot_id: i64,
        reply: oneshot::Sender<Result<LinkOutcome, String>>,
    },
    QueryHistory {
        serial: Option<String>,
        limit: usize,
        reply: oneshot::Sender<Vec<SnapshotRecord>>,
    },
}

/// Cloneable handle workers use to reach the persistence/notification owner.
///
/// When the owning router is gone, publishes are dropped and persistence
/// calls return an error immediately: surfaced data loss is preferred over
/// blocking a worker forever.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl BridgeHandle {
    /// Fire-and-forget event publication.
    pub fn publish(&self, event: &str, payload: Value) {
        let sent = self.tx.send(OutboundMessage::Publish {
            event: event.to_string(),
            payload,
        });
        if sent.is_err() {
            debug!(event, "event dropped, notification boundary is gone");
        }
    }

    /// Persist a snapshot and wait for its id. Blocks the calling worker
    /// thread; must not be called from async context.
    pub fn save_snapshot(
        &self,
        serial: &str,
        report: &ScanReport,
        duration_ms: u64,
        raw_text: &str,
        game_id: Option<&str>,
    ) -> Result<i64, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OutboundMessage::SaveSnapshot {
                serial: serial.to_string(),
                report: report.clone(),
                duration_ms,
                raw_text: raw_text.to_string(),
                game_id: game_id.map(|s| s.to_string()),
                reply,
            })
            .map_err(|_| "persistence boundary unavailable".to_string())?;
        rx.blocking_recv()
            .map_err(|_| "persistence boundary dropped the request".to_string())?
    }

    /// Associate an extracted game id with account records. Blocking, same
    /// rules as `save_snapshot`.
    pub fn link_or_queue_account(
        &self,
        serial: &str,
        game_id: &str,
        display_name: &str,
        snapshot_id: i64,
    ) -> Result<LinkOutcome, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OutboundMessage::LinkAccount {
                serial: serial.to_string(),
                game_id: game_id.to_string(),
                display_name: display_name.to_string(),
                snapshot_id,
                reply,
            })
            .map_err(|_| "persistence boundary unavailable".to_string())?;
        rx.blocking_recv()
            .map_err(|_| "persistence boundary dropped the request".to_string())?
    }

    /// Read back persisted snapshots, newest first.
    pub async fn query_history(
        &self,
        serial: Option<&str>,
        limit: usize,
    ) -> Vec<SnapshotRecord> {
        let (reply, rx) = oneshot::channel();
        let sent = self.tx.send(OutboundMessage::QueryHistory {
            serial: serial.map(|s| s.to_string()),
            limit,
            reply,
        });
        if sent.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Spawn the single owner of the persistence and notification connections.
/// It drains the outbound channel on its own schedule until every handle is
/// dropped.
pub fn spawn_bridge(
    mut storage: Box<dyn Storage>,
    sink: Box<dyn EventSink>,
) -> (BridgeHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                OutboundMessage::Publish { event, payload } => {
                    sink.publish(&event, &payload);
                }
                OutboundMessage::SaveSnapshot {
                    serial,
                    report,
                    duration_ms,
                    raw_text,
                    game_id,
                    reply,
                } => {
                    let result = storage.save_snapshot(
                        &serial,
                        &report,
                        duration_ms,
                        &raw_text,
                        game_id.as_deref(),
                    );
                    if let Err(e) = &result {
                        warn!(serial, error = %e, "snapshot save failed");
                    }
                    let _ = reply.send(result);
                }
                OutboundMessage::LinkAccount {
                    serial,
                    game_id,
                    display_name,
                    snapshot_id,
                    reply,
                } => {
                    let result =
                        storage.link_or_queue_account(&serial, &game_id, &display_name, snapshot_id);
                    let _ = reply.send(result);
                }
                OutboundMessage::QueryHistory { serial, limit, reply } => {
                    let _ = reply.send(storage.query_history(serial.as_deref(), limit));
                }
            }
        }
        debug!("outbound bridge drained, shutting down");
    });

    (BridgeHandle { tx }, task)
}

struct PendingAccount {
    id: i64,
    dismissed: bool,
}

/// In-memory storage backend, for development and tests.
#[derive(Default)]
pub struct MemoryStorage {
    snapshots: Vec<SnapshotRecord>,
    accounts: HashMap<String, i64>,
    pending: HashMap<String, PendingAccount>,
    next_snapshot_id: i64,
    next_pending_id: i64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a known account for a game id, as a confirmed pending record
    /// would.
    pub fn register_account(&mut self, game_id: &str, account_id: i64) {
        self.accounts.insert(game_id.to_string(), account_id);
        self.pending.remove(game_id);
    }

    /// Dismiss a pending record. It resurfaces when the same game id is seen
    /// by a later scan.
    pub fn dismiss_pending(&mut self, pending_id: i64) -> bool {
        for pending in self.pending.values_mut() {
            if pending.id == pending_id {
                pending.dismissed = true;
                return true;
            }
        }
        false
    }

    pub fn active_pending_count(&self) -> usize {
        self.pending.values().filter(|p| !p.dismissed).count()
    }
}

impl Storage for MemoryStorage {
    fn save_snapshot(
        &mut self,
        serial: &str,
        report: &ScanReport,
        duration_ms: u64,
        _raw_text: &str,
        game_id: Option<&str>,
    ) -> Result<i64, String> {
        self.next_snapshot_id += 1;
        self.snapshots.push(SnapshotRecord {
            id: self.next_snapshot_id,
            serial: serial.to_string(),
            saved_at: Utc::now(),
            duration_ms,
            game_id: game_id.map(|s| s.to_string()),
            report: report.clone(),
        });
        Ok(self.next_snapshot_id)
    }

    fn link_or_queue_account(
        &mut self,
        _serial: &str,
        game_id: &str,
        _display_name: &str,
        _snapshot_id: i64,
    ) -> Result<LinkOutcome, String> {
        if let Some(account_id) = self.accounts.get(game_id) {
            return Ok(LinkOutcome::Linked {
                account_id: *account_id,
            });
        }

        // Unknown account: upsert a pending record. A previously dismissed
        // record for the same id resurfaces here.
        if let Some(pending) = self.pending.get_mut(game_id) {
            pending.dismissed = false;
            return Ok(LinkOutcome::Pending { pending_id: pending.id });
        }

        self.next_pending_id += 1;
        self.pending.insert(
            game_id.to_string(),
            PendingAccount {
                id: self.next_pending_id,
                dismissed: false,
            },
        );
        Ok(LinkOutcome::Pending {
            pending_id: self.next_pending_id,
        })
    }

    fn query_history(&self, serial: Option<&str>, limit: usize) -> Vec<SnapshotRecord> {
        self.snapshots
            .iter()
            .rev()
            .filter(|snap| serial.map_or(true, |s| snap.serial == s))
            .take(limit)
            .cloned()
            .collect()
    }
}
