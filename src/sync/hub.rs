//! In-memory realtime hub — channel subscriptions and peer broadcast.
//!
//! DESIGN
//! ======
//! Each channel holds its live sessions keyed by session id, each with the
//! owning client and its outbox. A channel exists only while it has at
//! least one session; the last release evicts it.
//!
//! Joins and parts are announced to the remaining peers as `channel:join`
//! and `channel:part` frames. Delivery is best-effort: a full outbox drops
//! the frame for that subscriber only. A client with several views on one
//! channel shares a single outbox, so it receives each frame once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{SessionHandle, SyncError, SyncScope, SyncService};
use crate::frame::{Data, Frame};

struct Subscriber {
    client_id: Uuid,
    outbox: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct ChannelState {
    sessions: HashMap<Uuid, Subscriber>,
}

impl ChannelState {
    fn broadcast(&self, frame: &Frame, exclude_client: Option<Uuid>) {
        let mut delivered = HashSet::new();
        for sub in self.sessions.values() {
            if exclude_client == Some(sub.client_id) || !delivered.insert(sub.client_id) {
                continue;
            }
            let _ = sub.outbox.try_send(frame.clone());
        }
    }
}

/// Shared hub. Clones share the same channel map.
#[derive(Clone)]
pub struct SyncHub {
    channels: Arc<Mutex<HashMap<Uuid, ChannelState>>>,
    max_subscribers: usize,
}

impl SyncHub {
    #[must_use]
    pub fn new(max_subscribers: usize) -> Self {
        Self { channels: Arc::new(Mutex::new(HashMap::new())), max_subscribers }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ChannelState>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a frame to every session on a channel, skipping sessions owned by
    /// `exclude_client`.
    pub fn broadcast(&self, channel_id: Uuid, frame: &Frame, exclude_client: Option<Uuid>) {
        let channels = self.lock();
        let Some(channel) = channels.get(&channel_id) else {
            return;
        };
        channel.broadcast(frame, exclude_client);
    }

    /// Number of live sessions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_id: Uuid) -> usize {
        self.lock()
            .get(&channel_id)
            .map_or(0, |c| c.sessions.len())
    }

    /// Number of channels with at least one live session.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    /// Distinct clients with a live session on a channel, sorted.
    #[must_use]
    pub fn members(&self, channel_id: Uuid) -> Vec<Uuid> {
        let channels = self.lock();
        let Some(channel) = channels.get(&channel_id) else {
            return Vec::new();
        };
        let mut clients: Vec<Uuid> = channel.sessions.values().map(|s| s.client_id).collect();
        clients.sort_unstable();
        clients.dedup();
        clients
    }
}

fn presence_frame(syscall: &str, channel_id: Uuid, client_id: Uuid, session_id: Uuid) -> Frame {
    let mut data = Data::new();
    data.insert("client_id".into(), serde_json::json!(client_id));
    data.insert("session_id".into(), serde_json::json!(session_id));
    Frame::request(syscall, data).with_channel_id(channel_id)
}

#[async_trait::async_trait]
impl SyncService for SyncHub {
    async fn activate(&self, scope: &SyncScope) -> Result<SessionHandle, SyncError> {
        if scope.outbox.is_closed() {
            return Err(SyncError::OutboxClosed);
        }

        let mut channels = self.lock();
        let channel = channels.entry(scope.channel_id).or_default();
        if channel.sessions.len() >= self.max_subscribers {
            let limit = self.max_subscribers;
            if channel.sessions.is_empty() {
                channels.remove(&scope.channel_id);
            }
            return Err(SyncError::ChannelFull { channel_id: scope.channel_id, limit });
        }

        let session = SessionHandle::new(scope.channel_id);
        let join = presence_frame("channel:join", scope.channel_id, scope.client_id, session.id());
        channel.broadcast(&join, Some(scope.client_id));
        channel
            .sessions
            .insert(session.id(), Subscriber { client_id: scope.client_id, outbox: scope.outbox.clone() });

        info!(
            channel_id = %scope.channel_id,
            client_id = %scope.client_id,
            session_id = %session.id(),
            sessions = channel.sessions.len(),
            "sync: session activated"
        );
        Ok(session)
    }

    fn deactivate(&self, session: SessionHandle) {
        let channel_id = session.channel_id();
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(&channel_id) else {
            debug!(%channel_id, session_id = %session.id(), "sync: deactivate for unknown channel");
            return;
        };
        let Some(sub) = channel.sessions.remove(&session.id()) else {
            debug!(%channel_id, session_id = %session.id(), "sync: deactivate for unknown session");
            return;
        };

        let part = presence_frame("channel:part", channel_id, sub.client_id, session.id());
        channel.broadcast(&part, Some(sub.client_id));
        let remaining = channel.sessions.len();
        info!(%channel_id, client_id = %sub.client_id, session_id = %session.id(), remaining, "sync: session released");

        if remaining == 0 {
            channels.remove(&channel_id);
            info!(%channel_id, "sync: evicted empty channel");
        }
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
