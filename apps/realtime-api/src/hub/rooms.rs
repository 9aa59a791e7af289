//! Room membership map and fan-out, shared by both registry designs.
//!
//! `Rooms` itself does no synchronization. The dispatcher owns one outright;
//! the locked registry keeps one behind a read/write lock. Fan-out only needs
//! `&self`, since enqueueing is a non-blocking `try_send`; eviction and
//! membership changes need `&mut self`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::{Envelope, HubEvent, RoomKey, UserId};

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct HubStats {
    pub active_rooms: usize,
    pub active_connections: usize,
}

/// Which event types are withheld from the originating user's connections.
#[derive(Debug, Clone, Default)]
pub struct EchoPolicy {
    no_echo: HashSet<String>,
}

impl EchoPolicy {
    pub fn new(no_echo: impl IntoIterator<Item = String>) -> Self {
        Self {
            no_echo: no_echo.into_iter().collect(),
        }
    }

    pub fn suppresses(&self, event_type: &str) -> bool {
        self.no_echo.contains(event_type)
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default)]
pub struct Fanout {
    pub delivered: usize,
    /// Recipients whose queue was full or whose pump is gone.
    pub evicted: Vec<ConnectionId>,
}

type Members<R, P> = HashMap<ConnectionId, ConnectionHandle<R, P>>;

pub struct Rooms<R, P> {
    rooms: HashMap<R, Members<R, P>>,
    echo: EchoPolicy,
    closed: bool,
}

impl<R: RoomKey, P: HubEvent> Rooms<R, P> {
    pub fn new(echo: EchoPolicy) -> Self {
        Self {
            rooms: HashMap::new(),
            echo,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Add a connection and announce it to the rest of its room.
    ///
    /// After [`Rooms::close_all`] the handle is dropped instead, which closes
    /// its queue and lets the pumps wind down.
    pub fn register(&mut self, handle: ConnectionHandle<R, P>) {
        if self.closed {
            tracing::debug!(conn_id = %handle.id(), "hub closed; refusing registration");
            handle.close();
            return;
        }

        let conn_id = handle.id().clone();
        let user_id = handle.user_id();
        let room_id = handle.room_id().clone();

        handle.lifecycle().mark_open();
        let members = self.rooms.entry(room_id.clone()).or_default();
        members.insert(conn_id.clone(), handle);

        tracing::info!(
            %conn_id,
            %room_id,
            user_id,
            room_size = members.len(),
            "connection registered"
        );

        if let Some(joined) = P::user_joined(user_id) {
            let envelope = Arc::new(Envelope::new(room_id.clone(), user_id, joined));
            let fanout = self.fan_out(&envelope, Some(&conn_id));
            self.evict(&room_id, fanout.evicted);
        }
    }

    /// Remove a connection, closing its queue and announcing the departure.
    /// Returns false if it was not registered.
    pub fn unregister(&mut self, room_id: &R, conn_id: &ConnectionId) -> bool {
        let present = self
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(conn_id));
        if present {
            self.evict(room_id, vec![conn_id.clone()]);
        }
        present
    }

    /// Deliver to every member of the envelope's room, then evict the
    /// members that could not take it.
    pub fn broadcast(&mut self, envelope: Envelope<R, P>) -> usize {
        let envelope = Arc::new(envelope);
        let fanout = self.fan_out(&envelope, None);
        let delivered = fanout.delivered;
        self.evict(&envelope.room_id, fanout.evicted);
        delivered
    }

    /// Enqueue `envelope` on every member of its room except `skip`,
    /// honouring the echo policy. Never blocks and never mutates membership.
    pub fn fan_out(&self, envelope: &Arc<Envelope<R, P>>, skip: Option<&ConnectionId>) -> Fanout {
        let mut fanout = Fanout::default();
        let Some(members) = self.rooms.get(&envelope.room_id) else {
            return fanout;
        };

        let no_echo = self.echo.suppresses(envelope.event_type());
        for (conn_id, handle) in members {
            if Some(conn_id) == skip || (no_echo && handle.user_id() == envelope.user_id) {
                continue;
            }
            match handle.enqueue(envelope.clone()) {
                Ok(()) => fanout.delivered += 1,
                Err(reason) => {
                    tracing::warn!(
                        %conn_id,
                        room_id = %envelope.room_id,
                        user_id = handle.user_id(),
                        event_type = envelope.event_type(),
                        ?reason,
                        "dropping slow or dead consumer"
                    );
                    fanout.evicted.push(conn_id.clone());
                }
            }
        }
        fanout
    }

    /// Enqueue on a single member. A full queue evicts it like a broadcast would.
    pub fn send_to(&mut self, conn_id: &ConnectionId, envelope: Envelope<R, P>) -> bool {
        let room_id = envelope.room_id.clone();
        let Some(handle) = self.rooms.get(&room_id).and_then(|m| m.get(conn_id)) else {
            return false;
        };

        match handle.enqueue(Arc::new(envelope)) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(%conn_id, %room_id, ?reason, "dropping slow or dead consumer");
                self.evict(&room_id, vec![conn_id.clone()]);
                false
            }
        }
    }

    /// Remove each listed connection, close its queue and announce the
    /// departure. Announcements can evict further members, so this works
    /// through a queue until nothing is left.
    pub fn evict(&mut self, room_id: &R, evicted: Vec<ConnectionId>) {
        let mut pending = evicted;
        while let Some(conn_id) = pending.pop() {
            let Some(handle) = self.remove(room_id, &conn_id) else {
                continue;
            };
            let user_id = handle.user_id();
            handle.close();

            if let Some(left) = P::user_left(user_id) {
                let envelope = Arc::new(Envelope::new(room_id.clone(), user_id, left));
                pending.extend(self.fan_out(&envelope, None).evicted);
            }
        }
    }

    /// De-duplicated, sorted user ids with a live connection in the room.
    pub fn online_users(&self, room_id: &R) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .values()
                    .map(|h| h.user_id())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_rooms: self.rooms.len(),
            active_connections: self.rooms.values().map(HashMap::len).sum(),
        }
    }

    /// Refuse further registrations and close every outbound queue.
    /// Returns the number of connections closed.
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let mut closed = 0;
        for (_, members) in self.rooms.drain() {
            for (_, handle) in members {
                handle.close();
                closed += 1;
            }
        }
        closed
    }

    fn remove(&mut self, room_id: &R, conn_id: &ConnectionId) -> Option<ConnectionHandle<R, P>> {
        let members = self.rooms.get_mut(room_id)?;
        let handle = members.remove(conn_id)?;
        let remaining = members.len();
        if remaining == 0 {
            self.rooms.remove(room_id);
        }
        tracing::info!(
            %conn_id,
            %room_id,
            user_id = handle.user_id(),
            remaining,
            "connection unregistered"
        );
        Some(handle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::super::connection::{self, Connection, ConnectionState};
    use super::*;

    /// Minimal payload for exercising the hub without the app's event set.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum TestEvent {
        Joined(UserId),
        Left(UserId),
        Note(u32),
        Typing,
    }

    impl HubEvent for TestEvent {
        fn event_type(&self) -> &str {
            match self {
                Self::Joined(_) => "JOINED",
                Self::Left(_) => "LEFT",
                Self::Note(_) => "NOTE",
                Self::Typing => "TYPING",
            }
        }

        fn user_joined(user_id: UserId) -> Option<Self> {
            Some(Self::Joined(user_id))
        }

        fn user_left(user_id: UserId) -> Option<Self> {
            Some(Self::Left(user_id))
        }
    }

    pub type TestConn = Connection<u64, TestEvent>;

    pub fn rooms() -> Rooms<u64, TestEvent> {
        Rooms::new(EchoPolicy::new(["TYPING".to_string()]))
    }

    pub fn join(rooms: &mut Rooms<u64, TestEvent>, user_id: UserId, room_id: u64, capacity: usize) -> TestConn {
        let (handle, conn) = connection::channel(user_id, room_id, capacity);
        rooms.register(handle);
        conn
    }

    /// Everything currently queued for a connection, without waiting.
    pub fn drain(conn: &mut TestConn) -> Vec<TestEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = conn.outbound.try_recv() {
            out.push(envelope.payload.clone());
        }
        out
    }

    fn note(room_id: u64, user_id: UserId, n: u32) -> Envelope<u64, TestEvent> {
        Envelope::new(room_id, user_id, TestEvent::Note(n))
    }

    #[test]
    fn register_announces_to_the_rest_of_the_room() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 8);
        let mut c2 = join(&mut rooms, 2, 10, 8);

        assert_eq!(drain(&mut c1), vec![TestEvent::Joined(2)]);
        assert!(drain(&mut c2).is_empty());
        assert_eq!(c1.lifecycle.current(), ConnectionState::Open);
    }

    #[test]
    fn broadcast_scenario_with_room_isolation() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 8);
        let mut c2 = join(&mut rooms, 2, 10, 8);
        let mut c3 = join(&mut rooms, 3, 20, 8);
        drain(&mut c1);

        let delivered = rooms.broadcast(note(10, 1, 7));
        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut c1), vec![TestEvent::Note(7)]);
        assert_eq!(drain(&mut c2), vec![TestEvent::Note(7)]);
        assert!(drain(&mut c3).is_empty());

        assert_eq!(rooms.online_users(&10), vec![1, 2]);
        assert_eq!(rooms.online_users(&20), vec![3]);
    }

    #[test]
    fn no_echo_types_skip_the_sender_only() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 8);
        let mut c1b = join(&mut rooms, 1, 10, 8);
        let mut c2 = join(&mut rooms, 2, 10, 8);
        drain(&mut c1);
        drain(&mut c1b);

        rooms.broadcast(Envelope::new(10, 1, TestEvent::Typing));
        assert!(drain(&mut c1).is_empty());
        assert!(drain(&mut c1b).is_empty());
        assert_eq!(drain(&mut c2), vec![TestEvent::Typing]);
    }

    #[test]
    fn each_event_is_delivered_once_in_order() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 16);
        for n in 0..5 {
            rooms.broadcast(note(10, 9, n));
        }
        let expected: Vec<_> = (0..5).map(TestEvent::Note).collect();
        assert_eq!(drain(&mut c1), expected);
    }

    #[test]
    fn full_queue_evicts_only_the_slow_consumer() {
        let mut rooms = rooms();
        let mut slow = join(&mut rooms, 1, 10, 2);
        let mut fast = join(&mut rooms, 2, 10, 64);
        // slow holds JOINED(2); one more fills it.
        rooms.broadcast(note(10, 2, 0));
        drain(&mut fast);

        rooms.broadcast(note(10, 2, 1));

        assert_eq!(rooms.online_users(&10), vec![2]);
        assert_eq!(drain(&mut fast), vec![TestEvent::Note(1), TestEvent::Left(1)]);

        // The evicted queue still yields what it buffered, then ends.
        assert_eq!(drain(&mut slow), vec![TestEvent::Joined(2), TestEvent::Note(0)]);
        assert_eq!(slow.outbound.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert!(slow.lifecycle.current().is_closing());
    }

    #[test]
    fn dead_consumer_is_evicted_on_next_delivery() {
        let mut rooms = rooms();
        let c1 = join(&mut rooms, 1, 10, 8);
        let _c2 = join(&mut rooms, 2, 10, 8);
        drop(c1);

        rooms.broadcast(note(10, 2, 0));
        assert_eq!(rooms.online_users(&10), vec![2]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut rooms = rooms();
        let c1 = join(&mut rooms, 1, 10, 8);
        let mut c2 = join(&mut rooms, 2, 10, 8);

        assert!(rooms.unregister(&10, &c1.info.id));
        assert!(!rooms.unregister(&10, &c1.info.id));
        assert!(!rooms.unregister(&10, &ConnectionId::new()));
        assert!(!rooms.unregister(&99, &c2.info.id));

        assert_eq!(drain(&mut c2), vec![TestEvent::Left(1)]);
        assert_eq!(rooms.online_users(&10), vec![2]);
    }

    #[test]
    fn empty_rooms_are_removed() {
        let mut rooms = rooms();
        let c1 = join(&mut rooms, 1, 10, 8);
        let c2 = join(&mut rooms, 1, 10, 8);
        assert_eq!(rooms.online_users(&10), vec![1]);
        assert_eq!(rooms.stats(), HubStats { active_rooms: 1, active_connections: 2 });

        rooms.unregister(&10, &c1.info.id);
        assert_eq!(rooms.online_users(&10), vec![1]);
        rooms.unregister(&10, &c2.info.id);

        assert!(rooms.online_users(&10).is_empty());
        assert_eq!(rooms.stats(), HubStats::default());
        assert!(rooms.rooms.is_empty());
    }

    #[test]
    fn broadcast_to_unknown_room_is_a_no_op() {
        let mut rooms = rooms();
        assert_eq!(rooms.broadcast(note(42, 1, 0)), 0);
        assert!(rooms.rooms.is_empty());
    }

    #[test]
    fn send_to_targets_one_connection() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 8);
        let mut c2 = join(&mut rooms, 2, 10, 8);
        drain(&mut c1);

        assert!(rooms.send_to(&c2.info.id, note(10, 2, 5)));
        assert_eq!(drain(&mut c2), vec![TestEvent::Note(5)]);
        assert!(drain(&mut c1).is_empty());

        assert!(!rooms.send_to(&ConnectionId::new(), note(10, 2, 6)));
    }

    #[test]
    fn close_all_closes_queues_and_refuses_new_members() {
        let mut rooms = rooms();
        let mut c1 = join(&mut rooms, 1, 10, 8);
        let _c2 = join(&mut rooms, 2, 20, 8);

        assert_eq!(rooms.close_all(), 2);
        assert!(rooms.is_closed());
        drain(&mut c1);
        assert_eq!(c1.outbound.try_recv().unwrap_err(), TryRecvError::Disconnected);

        let mut late = join(&mut rooms, 3, 10, 8);
        assert_eq!(late.outbound.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(late.lifecycle.current(), ConnectionState::Closing);
        assert_eq!(rooms.stats(), HubStats::default());
    }
}
