//! Registry backed by a read/write lock over the room map.
//!
//! Operations run in the caller's task. Fan-out holds only the read lock, so
//! broadcasts to different rooms proceed in parallel; evictions and membership
//! changes take the write lock. No lock is held across an await.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::{Envelope, HubEvent, RoomKey, UserId};
use super::rooms::{EchoPolicy, HubStats, Rooms};
use super::RoomRegistry;
use crate::config::HubConfig;

pub struct LockedHub<R, P> {
    rooms: RwLock<Rooms<R, P>>,
}

impl<R: RoomKey, P: HubEvent> LockedHub<R, P> {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            rooms: RwLock::new(Rooms::new(EchoPolicy::new(
                config.no_echo_types.iter().cloned(),
            ))),
        }
    }
}

#[async_trait]
impl<R: RoomKey, P: HubEvent> RoomRegistry<R, P> for LockedHub<R, P> {
    async fn register(&self, handle: ConnectionHandle<R, P>) {
        self.rooms.write().register(handle);
    }

    async fn unregister(&self, room_id: &R, conn_id: &ConnectionId) {
        self.rooms.write().unregister(room_id, conn_id);
    }

    async fn broadcast(&self, envelope: Envelope<R, P>) {
        let envelope = Arc::new(envelope);
        let evicted = self.rooms.read().fan_out(&envelope, None).evicted;
        if !evicted.is_empty() {
            self.rooms.write().evict(&envelope.room_id, evicted);
        }
    }

    async fn send_to(&self, conn_id: &ConnectionId, envelope: Envelope<R, P>) {
        self.rooms.write().send_to(conn_id, envelope);
    }

    async fn online_users(&self, room_id: &R) -> Vec<UserId> {
        self.rooms.read().online_users(room_id)
    }

    async fn stats(&self) -> HubStats {
        self.rooms.read().stats()
    }

    async fn shutdown(&self) {
        let closed = self.rooms.write().close_all();
        tracing::info!(closed, "hub shut down");
    }
}
