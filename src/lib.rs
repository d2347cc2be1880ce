//! livesync — realtime channel sync driven by mount-scoped sessions.
//!
//! A [`boundary::MountBoundary`] wraps a view and keeps one sync session
//! open for exactly as long as the view is mounted. The websocket gateway
//! in [`routes`] treats each connection as a view tree over a shared
//! [`sync::SyncHub`].

pub mod boundary;
pub mod config;
pub mod frame;
pub mod report;
pub mod routes;
pub mod state;
pub mod sync;
