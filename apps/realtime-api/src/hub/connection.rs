//! Per-connection identity, lifecycle, and the two halves of the outbound
//! queue.
//!
//! The registry owns the [`ConnectionHandle`], which holds the only sender of
//! the outbound queue. Dropping the handle is what closes the queue, so the
//! write pump observes unregistration by `recv()` returning `None` after any
//! buffered events have been drained.

use std::fmt::{self, Display};
use std::sync::Arc;

use roomcast_common::id::prefix;
use roomcast_common::PrefixedId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::envelope::{Envelope, UserId};

/// Opaque, unique id of one live socket (`conn_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(Self::generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `Connecting → Open → Closing → Closed`. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_closing(self) -> bool {
        self >= Self::Closing
    }
}

/// Shared lifecycle cell observed by the registry and both pumps.
#[derive(Debug, Clone)]
pub struct Lifecycle(Arc<watch::Sender<ConnectionState>>);

impl Lifecycle {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);
        Self(Arc::new(tx))
    }

    pub fn current(&self) -> ConnectionState {
        *self.0.borrow()
    }

    /// `Connecting → Open`. Returns false if the connection is past that point.
    pub fn mark_open(&self) -> bool {
        self.advance_to(ConnectionState::Open)
    }

    /// Enter `Closing` unless already closing or closed.
    pub fn begin_closing(&self) -> bool {
        self.advance_to(ConnectionState::Closing)
    }

    /// Terminal. Only called once both pumps have exited.
    pub fn mark_closed(&self) {
        self.advance_to(ConnectionState::Closed);
    }

    fn advance_to(&self, next: ConnectionState) -> bool {
        self.0.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

/// Resolves once the watched connection is closing or closed.
pub async fn closing(rx: &mut watch::Receiver<ConnectionState>) {
    loop {
        let state = *rx.borrow_and_update();
        if state.is_closing() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Who a connection belongs to and where it listens.
#[derive(Debug, Clone)]
pub struct ConnectionInfo<R> {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub room_id: R,
}

/// Why an enqueue attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The consumer is not keeping up.
    Full,
    /// The write pump is gone.
    Closed,
}

/// Registry-side half: identity plus the sole sender of the outbound queue.
#[derive(Debug)]
pub struct ConnectionHandle<R, P> {
    info: ConnectionInfo<R>,
    lifecycle: Lifecycle,
    outbound: mpsc::Sender<Arc<Envelope<R, P>>>,
}

impl<R, P> ConnectionHandle<R, P> {
    pub fn id(&self) -> &ConnectionId {
        &self.info.id
    }

    pub fn user_id(&self) -> UserId {
        self.info.user_id
    }

    pub fn room_id(&self) -> &R {
        &self.info.room_id
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn enqueue(&self, envelope: Arc<Envelope<R, P>>) -> Result<(), EnqueueError> {
        self.outbound.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue. Buffered events remain readable by the
    /// write pump.
    pub fn close(self) {
        self.lifecycle.begin_closing();
    }
}

/// Pump-side half: identity, lifecycle, and the outbound queue receiver.
#[derive(Debug)]
pub struct Connection<R, P> {
    pub info: ConnectionInfo<R>,
    pub lifecycle: Lifecycle,
    pub outbound: mpsc::Receiver<Arc<Envelope<R, P>>>,
}

/// Create both halves of a new connection in the `Connecting` state.
pub fn channel<R: Clone, P>(
    user_id: UserId,
    room_id: R,
    capacity: usize,
) -> (ConnectionHandle<R, P>, Connection<R, P>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let info = ConnectionInfo {
        id: ConnectionId::new(),
        user_id,
        room_id,
    };
    let lifecycle = Lifecycle::new();

    let handle = ConnectionHandle {
        info: info.clone(),
        lifecycle: lifecycle.clone(),
        outbound: tx,
    };
    let connection = Connection {
        info,
        lifecycle,
        outbound: rx,
    };
    (handle, connection)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn connection_ids_are_prefixed_and_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert!(ConnectionId::is_valid(a.as_str()));
        assert!(a.to_string().starts_with("conn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        let (handle, conn) = channel::<u64, ()>(1, 10, 4);
        let lifecycle = conn.lifecycle.clone();
        assert_eq!(lifecycle.current(), ConnectionState::Connecting);

        assert!(lifecycle.mark_open());
        assert!(!lifecycle.mark_open());
        assert_eq!(lifecycle.current(), ConnectionState::Open);

        assert!(lifecycle.begin_closing());
        assert!(!lifecycle.begin_closing());
        assert!(!lifecycle.mark_open());
        assert_eq!(lifecycle.current(), ConnectionState::Closing);

        lifecycle.mark_closed();
        assert!(!handle.lifecycle().mark_open());
        assert_eq!(lifecycle.current(), ConnectionState::Closed);
    }

    #[test]
    fn enqueue_reports_full_then_closed() {
        let (handle, conn) = channel::<u64, ()>(1, 10, 1);
        let envelope = Arc::new(Envelope {
            room_id: 10,
            user_id: 1,
            payload: (),
            timestamp: chrono::Utc::now(),
        });

        assert_eq!(handle.enqueue(envelope.clone()), Ok(()));
        assert_eq!(handle.enqueue(envelope.clone()), Err(EnqueueError::Full));

        drop(conn);
        assert_eq!(handle.enqueue(envelope), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn closing_the_handle_drains_then_ends_the_queue() {
        let (handle, mut conn) = channel::<u64, ()>(1, 10, 4);
        let envelope = Arc::new(Envelope {
            room_id: 10,
            user_id: 1,
            payload: (),
            timestamp: chrono::Utc::now(),
        });
        handle.enqueue(envelope).unwrap();
        handle.close();

        assert!(conn.outbound.recv().await.is_some());
        assert!(conn.outbound.recv().await.is_none());
        assert_eq!(conn.lifecycle.current(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn closing_future_wakes_on_transition() {
        let (_handle, conn) = channel::<u64, ()>(1, 10, 4);
        let mut rx = conn.lifecycle.subscribe();
        let lifecycle = conn.lifecycle.clone();

        let waiter = tokio::spawn(async move { closing(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        lifecycle.begin_closing();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closing() resolved")
            .unwrap();
    }
}
