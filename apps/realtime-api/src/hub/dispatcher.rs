//! Registry backed by a single dispatcher task.
//!
//! The task owns the room map outright and applies commands one at a time
//! from a bounded queue. All operations share that queue, so a caller's
//! register, broadcast and query are applied in the order it issued them.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::{Envelope, HubEvent, RoomKey, UserId};
use super::rooms::{EchoPolicy, HubStats, Rooms};
use super::RoomRegistry;
use crate::config::HubConfig;

enum Command<R, P> {
    Register(ConnectionHandle<R, P>),
    Unregister {
        room_id: R,
        conn_id: ConnectionId,
    },
    Broadcast(Envelope<R, P>),
    SendTo {
        conn_id: ConnectionId,
        envelope: Envelope<R, P>,
    },
    OnlineUsers {
        room_id: R,
        reply: oneshot::Sender<Vec<UserId>>,
    },
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<usize>),
}

pub struct DispatcherHub<R, P> {
    commands: mpsc::Sender<Command<R, P>>,
}

impl<R: RoomKey, P: HubEvent> DispatcherHub<R, P> {
    /// Start the dispatcher task on the current runtime.
    pub fn spawn(config: &HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let rooms = Rooms::new(EchoPolicy::new(config.no_echo_types.iter().cloned()));
        tokio::spawn(run(rx, rooms));
        Self { commands: tx }
    }

    async fn submit(&self, command: Command<R, P>) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("hub dispatcher stopped; command dropped");
        }
    }

    async fn ask<T: Default>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command<R, P>) -> T {
        let (tx, rx) = oneshot::channel();
        self.submit(build(tx)).await;
        rx.await.unwrap_or_default()
    }
}

async fn run<R: RoomKey, P: HubEvent>(mut rx: mpsc::Receiver<Command<R, P>>, mut rooms: Rooms<R, P>) {
    tracing::debug!("hub dispatcher started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register(handle) => rooms.register(handle),
            Command::Unregister { room_id, conn_id } => {
                rooms.unregister(&room_id, &conn_id);
            }
            Command::Broadcast(envelope) => {
                rooms.broadcast(envelope);
            }
            Command::SendTo { conn_id, envelope } => {
                rooms.send_to(&conn_id, envelope);
            }
            Command::OnlineUsers { room_id, reply } => {
                let _ = reply.send(rooms.online_users(&room_id));
            }
            Command::Stats(reply) => {
                let _ = reply.send(rooms.stats());
            }
            Command::Shutdown(reply) => {
                let closed = rooms.close_all();
                // Stop intake; whatever is already queued is still applied
                // against the closed map below.
                rx.close();
                let _ = reply.send(closed);
            }
        }
    }
    tracing::debug!("hub dispatcher stopped");
}

#[async_trait]
impl<R: RoomKey, P: HubEvent> RoomRegistry<R, P> for DispatcherHub<R, P> {
    async fn register(&self, handle: ConnectionHandle<R, P>) {
        self.submit(Command::Register(handle)).await;
    }

    async fn unregister(&self, room_id: &R, conn_id: &ConnectionId) {
        self.submit(Command::Unregister {
            room_id: room_id.clone(),
            conn_id: conn_id.clone(),
        })
        .await;
    }

    async fn broadcast(&self, envelope: Envelope<R, P>) {
        self.submit(Command::Broadcast(envelope)).await;
    }

    async fn send_to(&self, conn_id: &ConnectionId, envelope: Envelope<R, P>) {
        self.submit(Command::SendTo {
            conn_id: conn_id.clone(),
            envelope,
        })
        .await;
    }

    async fn online_users(&self, room_id: &R) -> Vec<UserId> {
        let room_id = room_id.clone();
        self.ask(|reply| Command::OnlineUsers { room_id, reply }).await
    }

    async fn stats(&self) -> HubStats {
        self.ask(Command::Stats).await
    }

    async fn shutdown(&self) {
        let closed = self.ask(Command::Shutdown).await;
        tracing::info!(closed, "hub shut down");
    }
}
