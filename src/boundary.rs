//! Live-sync mount boundary — a sync session scoped to a mounted subtree.
//!
//! DESIGN
//! ======
//! The boundary wraps its children and renders them unchanged. The first
//! render spawns session activation on the tokio runtime and returns right
//! away; later renders are pass-through. Teardown (explicit `unmount` or
//! `Drop`) releases the session before returning.
//!
//! LIFECYCLE
//! =========
//! `Inactive → Activating → Live | Failed → Disposed`
//!
//! The boundary and its activation task share one slot. Teardown swaps in
//! `Disposed` and releases whatever session it finds. An activation that
//! resolves after teardown sees `Disposed` and releases its own session, so
//! no session outlives the boundary even when unmount races activation.
//!
//! ERROR HANDLING
//! ==============
//! Activation failures are reported to the [`ErrorReporter`] and the
//! boundary moves to `Failed`. Children keep rendering either way.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::report::{ErrorReporter, SessionEstablishmentFailure};
use crate::sync::{SessionHandle, SyncError, SyncScope, SyncService};

enum Slot {
    Inactive,
    Activating,
    Live(SessionHandle),
    Failed,
    Disposed,
}

/// Observable lifecycle phase of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    Inactive,
    Activating,
    Live,
    Failed,
    Disposed,
}

/// How an activation resolved, handed to the settle hook.
#[derive(Debug)]
pub enum Settled {
    Live(Uuid),
    Failed(SyncError),
}

type SettleHook = Box<dyn FnOnce(Settled) + Send>;

/// What teardown did with the boundary's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// A live session was released before teardown returned.
    Released(Uuid),
    /// Activation was still in flight; its session is released on arrival.
    Deferred,
    /// Nothing to release (never rendered, activation failed, or already torn down).
    Idle,
}

impl Release {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Released(_) => "released",
            Self::Deferred => "deferred",
            Self::Idle => "idle",
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MountBoundary<C> {
    children: C,
    scope: SyncScope,
    service: Arc<dyn SyncService>,
    reporter: Arc<dyn ErrorReporter>,
    slot: Arc<Mutex<Slot>>,
    activation: Option<JoinHandle<()>>,
    on_settle: Option<SettleHook>,
}

impl<C> MountBoundary<C> {
    #[must_use]
    pub fn new(children: C, scope: SyncScope, service: Arc<dyn SyncService>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            children,
            scope,
            service,
            reporter,
            slot: Arc::new(Mutex::new(Slot::Inactive)),
            activation: None,
            on_settle: None,
        }
    }

    /// Run `hook` once activation resolves. Not called if the boundary was
    /// torn down first.
    #[must_use]
    pub fn on_settle(mut self, hook: impl FnOnce(Settled) + Send + 'static) -> Self {
        self.on_settle = Some(Box::new(hook));
        self
    }

    /// Render the children, activating the session on first call.
    pub fn render(&mut self) -> &C {
        self.activate_once();
        &self.children
    }

    #[must_use]
    pub fn state(&self) -> MountState {
        match &*lock(&self.slot) {
            Slot::Inactive => MountState::Inactive,
            Slot::Activating => MountState::Activating,
            Slot::Live(_) => MountState::Live,
            Slot::Failed => MountState::Failed,
            Slot::Disposed => MountState::Disposed,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        match &*lock(&self.slot) {
            Slot::Live(session) => Some(session.id()),
            _ => None,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> Uuid {
        self.scope.channel_id
    }

    /// Wait for an in-flight activation to resolve.
    pub async fn settled(&mut self) -> MountState {
        if let Some(activation) = self.activation.take() {
            let _ = activation.await;
        }
        self.state()
    }

    /// Tear the boundary down, releasing its session.
    pub fn unmount(mut self) -> Release {
        self.teardown()
    }

    fn activate_once(&mut self) {
        {
            let mut slot = lock(&self.slot);
            if !matches!(*slot, Slot::Inactive) {
                return;
            }
            *slot = Slot::Activating;
        }

        let Ok(runtime) = Handle::try_current() else {
            *lock(&self.slot) = Slot::Failed;
            let failure = SessionEstablishmentFailure {
                channel_id: self.scope.channel_id,
                client_id: self.scope.client_id,
                source: SyncError::NoRuntime,
            };
            self.reporter.report(&failure);
            if let Some(hook) = self.on_settle.take() {
                hook(Settled::Failed(failure.source));
            }
            return;
        };

        debug!(channel_id = %self.scope.channel_id, client_id = %self.scope.client_id, "boundary: activating");
        let slot = Arc::clone(&self.slot);
        let service = Arc::clone(&self.service);
        let reporter = Arc::clone(&self.reporter);
        let scope = self.scope.clone();
        let hook = self.on_settle.take();
        self.activation = Some(runtime.spawn(async move {
            let result = service.activate(&scope).await;
            settle(&slot, service.as_ref(), reporter.as_ref(), &scope, result, hook);
        }));
    }

    fn teardown(&mut self) -> Release {
        let previous = std::mem::replace(&mut *lock(&self.slot), Slot::Disposed);
        let release = match previous {
            Slot::Live(session) => {
                let session_id = session.id();
                self.service.deactivate(session);
                Release::Released(session_id)
            }
            Slot::Activating => Release::Deferred,
            Slot::Disposed => return Release::Idle,
            Slot::Inactive | Slot::Failed => Release::Idle,
        };
        info!(
            channel_id = %self.scope.channel_id,
            client_id = %self.scope.client_id,
            release = release.as_str(),
            "boundary: unmounted"
        );
        release
    }
}

impl<C> Drop for MountBoundary<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Apply an activation result to the shared slot, then notify the hook.
fn settle(
    slot: &Mutex<Slot>,
    service: &dyn SyncService,
    reporter: &dyn ErrorReporter,
    scope: &SyncScope,
    result: Result<SessionHandle, SyncError>,
    hook: Option<SettleHook>,
) {
    match result {
        Ok(session) => {
            let session_id = session.id();
            let mut guard = lock(slot);
            if matches!(*guard, Slot::Disposed) {
                drop(guard);
                debug!(
                    channel_id = %scope.channel_id,
                    %session_id,
                    "boundary: activation resolved after unmount, releasing"
                );
                service.deactivate(session);
                return;
            }
            *guard = Slot::Live(session);
            drop(guard);
            if let Some(hook) = hook {
                hook(Settled::Live(session_id));
            }
        }
        Err(source) => {
            let disposed = {
                let mut guard = lock(slot);
                let disposed = matches!(*guard, Slot::Disposed);
                if !disposed {
                    *guard = Slot::Failed;
                }
                disposed
            };
            let failure = SessionEstablishmentFailure { channel_id: scope.channel_id, client_id: scope.client_id, source };
            reporter.report(&failure);
            if let Some(hook) = hook.filter(|_| !disposed) {
                hook(Settled::Failed(failure.source));
            }
        }
    }
}

#[cfg(test)]
#[path = "boundary_test.rs"]
mod tests;
