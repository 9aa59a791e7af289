pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod routes;

use std::sync::Arc;

use tokio::sync::Semaphore;

use config::Config;
use events::RoomEvent;
use hub::SharedRegistry;

/// Rooms are keyed by the numeric id of the project or chat room they mirror.
pub type RoomId = u64;

/// The hub as the application uses it.
pub type RoomHub = SharedRegistry<RoomId, RoomEvent>;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: RoomHub,
    pub config: Arc<Config>,
    /// Present when `MAX_CONNECTIONS` caps concurrent sockets.
    pub connection_slots: Option<Arc<Semaphore>>,
}

impl AppState {
    /// Build the state and start the hub. Must be called inside a runtime.
    pub fn new(config: Config) -> Self {
        let hub = hub::build(&config.hub);
        let connection_slots = config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Self {
            hub,
            config: Arc::new(config),
            connection_slots,
        }
    }
}
