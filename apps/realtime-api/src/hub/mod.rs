//! Room-partitioned broadcast hub.
//!
//! Connections register into a room, events are fanned out to every live
//! connection of that room through bounded per-connection queues, and a
//! consumer that cannot keep up is evicted instead of slowing anyone else.

pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod locked;
pub mod pump;
pub mod rooms;

use std::sync::Arc;

use async_trait::async_trait;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionState};
pub use dispatcher::DispatcherHub;
pub use envelope::{ClientAction, Envelope, HubEvent, ProtocolError, RoomKey, UserId, WireEvent};
pub use locked::LockedHub;
pub use rooms::HubStats;

use crate::config::{HubConfig, HubMode};

/// Process-wide registry of live connections, partitioned by room.
///
/// Every operation is safe to call from any number of tasks. None of them
/// waits on a consumer; delivery is best effort.
#[async_trait]
pub trait RoomRegistry<R: RoomKey, P: HubEvent>: Send + Sync {
    /// Add a connection to its room and mark it open.
    async fn register(&self, handle: ConnectionHandle<R, P>);

    /// Remove a connection and close its outbound queue. Idempotent.
    async fn unregister(&self, room_id: &R, conn_id: &ConnectionId);

    /// Enqueue an event on every connection in the envelope's room.
    async fn broadcast(&self, envelope: Envelope<R, P>);

    /// Enqueue an event on one connection of the envelope's room.
    async fn send_to(&self, conn_id: &ConnectionId, envelope: Envelope<R, P>);

    /// Sorted, de-duplicated ids of users connected to a room.
    async fn online_users(&self, room_id: &R) -> Vec<UserId>;

    async fn stats(&self) -> HubStats;

    /// Refuse further registrations and close every connection.
    async fn shutdown(&self);
}

pub type SharedRegistry<R, P> = Arc<dyn RoomRegistry<R, P>>;

/// Build the registry selected by `config.mode`.
///
/// The dispatcher variant spawns its task, so this must run inside a runtime.
pub fn build<R: RoomKey, P: HubEvent>(config: &HubConfig) -> SharedRegistry<R, P> {
    tracing::info!(mode = ?config.mode, "starting room hub");
    match config.mode {
        HubMode::Dispatcher => Arc::new(DispatcherHub::spawn(config)),
        HubMode::Locked => Arc::new(LockedHub::new(config)),
    }
}
