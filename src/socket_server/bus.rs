//! Snapshot-then-broadcast fan-out
//!
//! The latest envelope lives in a `watch` channel. Publishing replaces it
//! without touching any connection; each connection task wakes up and pulls
//! the newest value itself, so a slow client can skip intermediate snapshots
//! but never receives an older one after a newer one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::protocol::encode_broadcast;
use crate::error::Result;

/// Default bound on a single send to one connection
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque per-connection id, e.g. `cli_3f2a9c1d`
pub type ClientId = String;

/// One published envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    /// Strictly increasing per bus
    pub sequence: u64,
    /// Encoded `{"id":-1,"result":<snapshot>}`
    pub message: Arc<str>,
}

/// A registered connection
#[derive(Debug, Clone)]
pub struct Member {
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

type Members = Arc<Mutex<HashMap<ClientId, Member>>>;

#[derive(Debug)]
pub struct NotificationBus {
    tx: watch::Sender<Option<Broadcast>>,
    members: Members,
    send_timeout: Duration,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl NotificationBus {
    pub fn new(send_timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            members: Arc::new(Mutex::new(HashMap::new())),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Encode `snapshot` once and make it the latest envelope
    ///
    /// Returns the sequence number assigned to it. Never waits on a
    /// connection; delivery failures are handled by the connection tasks.
    pub fn publish(&self, snapshot: &str) -> Result<u64> {
        let message: Arc<str> = encode_broadcast(snapshot)?.into();
        let mut sequence = 0;

        self.tx.send_modify(|latest| {
            sequence = latest.as_ref().map_or(1, |b| b.sequence + 1);
            *latest = Some(Broadcast { sequence, message });
        });

        tracing::debug!(
            "Published snapshot #{} to {} connections",
            sequence,
            self.connection_count()
        );

        Ok(sequence)
    }

    /// Latest envelope, if anything has been published yet
    pub fn latest(&self) -> Option<Broadcast> {
        self.tx.borrow().clone()
    }

    /// Register a connection
    ///
    /// The returned subscription carries the latest envelope as its initial
    /// snapshot. Capturing it marks it seen, so a publish racing with the
    /// join is delivered either as the initial snapshot or as the first
    /// update, never both and never neither.
    pub fn connect(&self, peer: Option<SocketAddr>) -> Subscription {
        let id = new_client_id();

        self.members.lock().insert(
            id.clone(),
            Member {
                peer,
                connected_at: Utc::now(),
            },
        );

        let mut rx = self.tx.subscribe();
        let initial = rx.borrow_and_update().clone();
        let last_sequence = initial.as_ref().map_or(0, |b| b.sequence);

        tracing::info!("Client {} connected from {:?}", id, peer);

        Subscription {
            id,
            rx,
            initial,
            last_sequence,
            members: Arc::clone(&self.members),
        }
    }

    /// Deregister a connection; unknown ids are ignored
    pub fn disconnect(&self, id: &str) -> bool {
        deregister(&self.members, id)
    }

    pub fn connection_count(&self) -> usize {
        self.members.lock().len()
    }

    pub fn members(&self) -> Vec<(ClientId, Member)> {
        self.members
            .lock()
            .iter()
            .map(|(id, member)| (id.clone(), member.clone()))
            .collect()
    }
}

fn new_client_id() -> ClientId {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("cli_{}", &uuid[..8])
}

fn deregister(members: &Members, id: &str) -> bool {
    let removed = members.lock().remove(id).is_some();
    if removed {
        tracing::info!("Client {} disconnected", id);
    }
    removed
}

/// A connection's view of the bus; dropping it deregisters the connection
#[derive(Debug)]
pub struct Subscription {
    id: ClientId,
    rx: watch::Receiver<Option<Broadcast>>,
    initial: Option<Broadcast>,
    last_sequence: u64,
    members: Members,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot current at connect time; yields it at most once
    pub fn take_initial(&mut self) -> Option<Broadcast> {
        self.initial.take()
    }

    /// Wait for an envelope newer than anything already yielded
    ///
    /// Returns None once the bus is gone. Cancel safe.
    pub async fn next(&mut self) -> Option<Broadcast> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }

            let latest = self.rx.borrow_and_update().clone();
            if let Some(broadcast) = latest {
                if broadcast.sequence > self.last_sequence {
                    self.last_sequence = broadcast.sequence;
                    return Some(broadcast);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        deregister(&self.members, &self.id);
    }
}
