//! Entity to wire snapshot translation

use crate::ws::protocol::{EntitySnapshot, LaserSnapshot, PlayerSnapshot};

use super::{Entity, Player, WorldState};

pub fn player_snapshot(player: &Player) -> PlayerSnapshot {
    PlayerSnapshot {
        id: player.id,
        name: player.name.clone(),
        icon: player.icon,
        position: player.position,
    }
}

/// Wire form of an entity, `None` for kinds clients do not track (walls)
pub fn entity_snapshot(entity: &Entity) -> Option<EntitySnapshot> {
    match entity {
        Entity::Player(p) => Some(EntitySnapshot::Player(player_snapshot(p))),
        Entity::Laser(l) => Some(EntitySnapshot::Laser(LaserSnapshot {
            id: l.id,
            owner_id: l.owner_id,
            position: l.position,
            direction: l.direction,
        })),
        Entity::Wall(_) => None,
    }
}

/// Every representable entity in the world
pub fn collect_entities(state: &WorldState) -> Vec<EntitySnapshot> {
    state.entities().filter_map(entity_snapshot).collect()
}

/// Every player in the world
pub fn collect_players(state: &WorldState) -> Vec<PlayerSnapshot> {
    state.players().map(player_snapshot).collect()
}
