//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{World, WorldReceivers};
use crate::server::GameServer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<World>,
    pub server: Arc<GameServer>,
}

impl AppState {
    /// Build the world and server; the returned receivers feed the
    /// simulation and the change watcher
    pub fn new(config: Config) -> (Self, WorldReceivers) {
        let config = Arc::new(config);

        // Initialize world
        let (world, receivers) = World::new(&config.game);

        // Initialize connection engine
        let server = Arc::new(GameServer::new(world.clone(), config.server.clone()));

        (
            Self {
                config,
                world,
                server,
            },
            receivers,
        )
    }
}
