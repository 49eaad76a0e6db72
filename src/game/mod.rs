//! Game world and simulation modules

pub mod entity;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use entity::{Entity, Laser, Player, Wall};
pub use simulation::Simulation;
pub use world::{IntentError, World, WorldReceivers, WorldState};

use uuid::Uuid;

use crate::ws::protocol::Direction;

/// Player request queued for the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Move {
        player_id: Uuid,
        direction: Direction,
    },
    Laser {
        owner_id: Uuid,
        laser_id: Uuid,
        direction: Direction,
    },
}

/// Notification that world state changed
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// An entity moved; carries its new state
    Move { entity: Entity },
    AddEntity { entity: Entity },
    RemoveEntity { id: Uuid },
    PlayerRespawn { player: Player, killed_by: Uuid },
    /// Winner and next-round time are read from the world
    RoundOver,
    /// Roster is read from the world
    RoundStart,
}
