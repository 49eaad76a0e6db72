//! Connection and broadcast engine

mod broadcast;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod watcher;

pub use error::ServerError;
pub use registry::{Client, ClientRegistry};
pub use watcher::watch_changes;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::ServerSettings;
use crate::game::World;
use crate::ws::protocol::ServerMsg;

/// Shared server state: connected clients plus the world they observe
pub struct GameServer {
    registry: ClientRegistry,
    world: Arc<World>,
    settings: ServerSettings,
    /// Parent of every connection's cancellation token
    shutdown: CancellationToken,
}

impl GameServer {
    pub fn new(world: Arc<World>, settings: ServerSettings) -> Self {
        Self {
            registry: ClientRegistry::new(),
            world,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Cancel every connection loop
    pub fn shutdown(&self) {
        info!("Cancelling all connections");
        self.shutdown.cancel();
    }

    /// Token for a new connection, cancelled on eviction or shutdown
    pub fn connection_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Remove a player from the world and announce it
    pub(crate) async fn remove_player(&self, id: Uuid) {
        self.world.write().remove_entity(id);
        self.broadcast(ServerMsg::RemoveEntity { id }).await;
    }
}
