//! Synchronization service — the collaborator a mount boundary drives.
//!
//! DESIGN
//! ======
//! A service hands out [`SessionHandle`]s from an async `activate` and takes
//! them back in a synchronous `deactivate`. Deactivation must not await so
//! that guards can release from `Drop`. Handles are move-only: once handed
//! back they cannot be used again.

pub mod hub;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};

pub use hub::SyncHub;

/// What a boundary asks the service to keep in sync.
#[derive(Debug, Clone)]
pub struct SyncScope {
    pub channel_id: Uuid,
    /// Connection that owns the view; used to skip echoing its own publishes.
    pub client_id: Uuid,
    /// Where realtime frames for this session are delivered.
    pub outbox: mpsc::Sender<Frame>,
}

/// An open subscription session. Minted by a [`SyncService`].
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: Uuid,
    channel_id: Uuid,
}

impl SessionHandle {
    #[must_use]
    pub fn new(channel_id: Uuid) -> Self {
        Self { id: Uuid::new_v4(), channel_id }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("channel {channel_id} is full (max {limit} sessions)")]
    ChannelFull { channel_id: Uuid, limit: usize },
    #[error("subscriber outbox is closed")]
    OutboxClosed,
    #[error("sync service unavailable: {0}")]
    Unavailable(String),
    #[error("no async runtime available to activate the session")]
    NoRuntime,
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ChannelFull { .. } => "E_CHANNEL_FULL",
            Self::OutboxClosed => "E_OUTBOX_CLOSED",
            Self::Unavailable(_) => "E_SYNC_UNAVAILABLE",
            Self::NoRuntime => "E_NO_RUNTIME",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ChannelFull { .. } | Self::Unavailable(_))
    }
}

#[async_trait::async_trait]
pub trait SyncService: Send + Sync {
    /// Open a session for `scope`.
    async fn activate(&self, scope: &SyncScope) -> Result<SessionHandle, SyncError>;

    /// Release a session. Must not block on I/O.
    fn deactivate(&self, session: SessionHandle);
}
