use super::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::{Duration, sleep, timeout};

use crate::frame::Frame;

#[derive(Default)]
struct MockService {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    live: std::sync::Mutex<HashSet<Uuid>>,
    fail_with: Option<SyncError>,
    gate: Option<Arc<Notify>>,
}

impl MockService {
    fn failing(err: SyncError) -> Self {
        Self { fail_with: Some(err), ..Self::default() }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::default() }
    }

    fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    fn live_sessions(&self) -> usize {
        self.live.lock().expect("mock mutex should lock").len()
    }
}

#[async_trait::async_trait]
impl SyncService for MockService {
    async fn activate(&self, scope: &SyncScope) -> Result<SessionHandle, SyncError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let session = SessionHandle::new(scope.channel_id);
        self.live
            .lock()
            .expect("mock mutex should lock")
            .insert(session.id());
        Ok(session)
    }

    fn deactivate(&self, session: SessionHandle) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .expect("mock mutex should lock")
            .remove(&session.id());
    }
}

#[derive(Default)]
struct CollectingReporter {
    failures: std::sync::Mutex<Vec<SessionEstablishmentFailure>>,
}

impl CollectingReporter {
    fn count(&self) -> usize {
        self.failures.lock().expect("reporter mutex should lock").len()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, failure: &SessionEstablishmentFailure) {
        self.failures
            .lock()
            .expect("reporter mutex should lock")
            .push(failure.clone());
    }
}

fn test_scope() -> (SyncScope, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(8);
    (SyncScope { channel_id: Uuid::new_v4(), client_id: Uuid::new_v4(), outbox: tx }, rx)
}

fn boundary<C>(
    children: C,
    service: &Arc<MockService>,
    reporter: &Arc<CollectingReporter>,
) -> (MountBoundary<C>, mpsc::Receiver<Frame>) {
    let (scope, rx) = test_scope();
    let service: Arc<dyn SyncService> = service.clone();
    let reporter: Arc<dyn ErrorReporter> = reporter.clone();
    (MountBoundary::new(children, scope, service, reporter), rx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_millis(500), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn static_child_renders_unchanged_with_one_session() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary(String::from("static child"), &service, &reporter);

    assert_eq!(b.state(), MountState::Inactive);
    assert_eq!(b.render(), "static child");
    assert_eq!(b.settled().await, MountState::Live);

    assert_eq!(service.activations(), 1);
    assert_eq!(service.live_sessions(), 1);
    assert!(b.session_id().is_some());
    assert_eq!(reporter.count(), 0);
}

#[tokio::test]
async fn render_returns_the_same_children() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary(vec![1, 2, 3], &service, &reporter);

    let first: *const Vec<i32> = b.render();
    let second: *const Vec<i32> = b.render();
    assert_eq!(first, second);
    assert_eq!(b.render(), &vec![1, 2, 3]);
}

#[tokio::test]
async fn rerender_does_not_activate_again() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);

    b.render();
    b.render();
    b.settled().await;
    b.render();
    b.render();
    b.settled().await;

    assert_eq!(service.activations(), 1);
    assert_eq!(service.live_sessions(), 1);
}

#[tokio::test]
async fn unmount_releases_live_session_before_returning() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);

    b.render();
    b.settled().await;
    let session_id = b.session_id().expect("live session");

    assert_eq!(b.unmount(), Release::Released(session_id));
    assert_eq!(service.deactivations(), 1);
    assert_eq!(service.live_sessions(), 0);
}

#[tokio::test]
async fn dropping_boundary_releases_session() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);

    b.render();
    b.settled().await;
    drop(b);

    assert_eq!(service.deactivations(), 1);
    assert_eq!(service.live_sessions(), 0);
}

#[tokio::test]
async fn dropping_an_owning_tree_releases_every_boundary() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());

    let mut tree = Vec::new();
    for i in 0..3 {
        let (mut b, rx) = boundary(i, &service, &reporter);
        b.render();
        b.settled().await;
        tree.push((b, rx));
    }
    assert_eq!(service.live_sessions(), 3);

    drop(tree);
    assert_eq!(service.deactivations(), 3);
    assert_eq!(service.live_sessions(), 0);
}

#[tokio::test]
async fn activation_failure_is_reported_and_child_still_renders() {
    let service = Arc::new(MockService::failing(SyncError::Unavailable("backend down".into())));
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary("child", &service, &reporter);

    assert_eq!(*b.render(), "child");
    assert_eq!(b.settled().await, MountState::Failed);
    assert_eq!(*b.render(), "child");

    assert_eq!(reporter.count(), 1);
    assert_eq!(service.live_sessions(), 0);
    assert!(b.session_id().is_none());

    assert_eq!(b.unmount(), Release::Idle);
    assert_eq!(service.live_sessions(), 0);
    assert_eq!(reporter.count(), 1);
}

#[tokio::test]
async fn reported_failure_carries_scope() {
    let service = Arc::new(MockService::failing(SyncError::OutboxClosed));
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);
    let channel_id = b.channel_id();

    b.render();
    b.settled().await;

    let failures = reporter.failures.lock().expect("reporter mutex should lock");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].channel_id, channel_id);
    assert!(matches!(failures[0].source, SyncError::OutboxClosed));
}

#[tokio::test]
async fn unmount_before_activation_resolves_releases_later() {
    let gate = Arc::new(Notify::new());
    let service = Arc::new(MockService::gated(gate.clone()));
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);

    b.render();
    wait_until(|| service.activations() == 1).await;
    assert_eq!(b.state(), MountState::Activating);
    assert_eq!(b.unmount(), Release::Deferred);
    assert_eq!(service.deactivations(), 0);

    gate.notify_one();
    wait_until(|| service.deactivations() == 1).await;
    assert_eq!(service.live_sessions(), 0);
    assert_eq!(reporter.count(), 0);
}

#[tokio::test]
async fn failed_activation_after_unmount_is_still_reported() {
    let gate = Arc::new(Notify::new());
    let service = Arc::new(MockService {
        fail_with: Some(SyncError::OutboxClosed),
        ..MockService::gated(gate.clone())
    });
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary((), &service, &reporter);

    b.render();
    assert_eq!(b.unmount(), Release::Deferred);
    gate.notify_one();

    wait_until(|| reporter.count() == 1).await;
    assert_eq!(service.deactivations(), 0);
    assert_eq!(service.live_sessions(), 0);
}

#[tokio::test]
async fn unmount_without_render_touches_nothing() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (b, _rx) = boundary((), &service, &reporter);

    assert_eq!(b.unmount(), Release::Idle);
    assert_eq!(service.activations(), 0);
    assert_eq!(service.deactivations(), 0);
}

#[tokio::test]
async fn mount_cycles_never_leak_sessions() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());

    for _ in 0..5 {
        let (mut b, _rx) = boundary((), &service, &reporter);
        b.render();
        b.render();
        b.settled().await;
        b.unmount();
    }

    assert_eq!(service.activations(), 5);
    assert_eq!(service.deactivations(), service.activations());
    assert_eq!(service.live_sessions(), 0);
}

#[test]
fn render_outside_runtime_reports_and_still_renders() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (mut b, _rx) = boundary(42, &service, &reporter);

    assert_eq!(*b.render(), 42);
    assert_eq!(b.state(), MountState::Failed);
    assert_eq!(service.activations(), 0);
    assert_eq!(reporter.count(), 1);
    assert_eq!(b.unmount(), Release::Idle);
}

#[test]
fn mount_state_labels() {
    assert_eq!(serde_json::json!(MountState::Live), "live");
    assert_eq!(serde_json::json!(MountState::Activating), "activating");
    assert_eq!(Release::Deferred.as_str(), "deferred");
}

// =============================================================================
// SETTLE HOOK
// =============================================================================

#[tokio::test]
async fn settle_hook_sees_live_session() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (b, _rx) = boundary((), &service, &reporter);
    let (tx, settled) = oneshot::channel();
    let mut b = b.on_settle(move |s| {
        let _ = tx.send(s);
    });

    b.render();
    let settled = timeout(Duration::from_millis(500), settled)
        .await
        .expect("hook timed out")
        .expect("hook dropped");
    let Settled::Live(session_id) = settled else {
        panic!("expected a live session");
    };
    assert_eq!(b.session_id(), Some(session_id));
}

#[tokio::test]
async fn settle_hook_sees_activation_error() {
    let service = Arc::new(MockService::failing(SyncError::Unavailable("backend down".into())));
    let reporter = Arc::new(CollectingReporter::default());
    let (b, _rx) = boundary((), &service, &reporter);
    let (tx, settled) = oneshot::channel();
    let mut b = b.on_settle(move |s| {
        let _ = tx.send(s);
    });

    b.render();
    let settled = timeout(Duration::from_millis(500), settled)
        .await
        .expect("hook timed out")
        .expect("hook dropped");
    assert!(matches!(settled, Settled::Failed(SyncError::Unavailable(_))));
    assert_eq!(b.state(), MountState::Failed);
    assert_eq!(reporter.count(), 1);
}

#[tokio::test]
async fn settle_hook_is_skipped_after_unmount() {
    let gate = Arc::new(Notify::new());
    let service = Arc::new(MockService::gated(gate.clone()));
    let reporter = Arc::new(CollectingReporter::default());
    let (b, _rx) = boundary((), &service, &reporter);
    let fired = Arc::new(AtomicBool::new(false));
    let hook_fired = fired.clone();
    let mut b = b.on_settle(move |_| hook_fired.store(true, Ordering::SeqCst));

    b.render();
    wait_until(|| service.activations() == 1).await;
    assert_eq!(b.unmount(), Release::Deferred);
    gate.notify_one();

    wait_until(|| service.deactivations() == 1).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[test]
fn settle_hook_fires_without_runtime() {
    let service = Arc::new(MockService::default());
    let reporter = Arc::new(CollectingReporter::default());
    let (b, _rx) = boundary((), &service, &reporter);
    let (tx, mut settled) = oneshot::channel();
    let mut b = b.on_settle(move |s| {
        let _ = tx.send(s);
    });

    b.render();
    assert!(matches!(settled.try_recv(), Ok(Settled::Failed(SyncError::NoRuntime))));
}
