//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Movement / firing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Stop,
}

/// Cell position in the arena grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub const ORIGIN: Coordinate = Coordinate { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell in `direction` (itself for `Stop`)
    pub fn step(self, direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::new(self.x, self.y - 1),
            Direction::Down => Self::new(self.x, self.y + 1),
            Direction::Left => Self::new(self.x - 1, self.y),
            Direction::Right => Self::new(self.x + 1, self.y),
            Direction::Stop => self,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Must be the first message on a connection
    Connect {
        /// Player identity, a UUID string
        id: String,
        /// Display name, ASCII alphanumeric
        name: String,
    },

    /// Move one cell
    Move { direction: Direction },

    /// Fire a laser
    Laser {
        /// Identity chosen by the client for the new laser
        id: String,
        direction: Direction,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Private world snapshot sent once after connect
    Initialize { entities: Vec<EntitySnapshot> },

    /// An entity appeared
    AddEntity { entity: EntitySnapshot },

    /// An entity changed (moved)
    UpdateEntity { entity: EntitySnapshot },

    /// An entity disappeared
    RemoveEntity { id: Uuid },

    /// A player was hit and respawned elsewhere
    PlayerRespawn {
        player: PlayerSnapshot,
        killed_by_id: Uuid,
    },

    /// Round finished, next one starts at `new_round_at`
    RoundOver {
        round_winner_id: Uuid,
        new_round_at: DateTime<Utc>,
    },

    /// New round started with the current roster
    RoundStart { players: Vec<PlayerSnapshot> },
}

impl ServerMsg {
    /// Short message kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Initialize { .. } => "initialize",
            ServerMsg::AddEntity { .. } => "add_entity",
            ServerMsg::UpdateEntity { .. } => "update_entity",
            ServerMsg::RemoveEntity { .. } => "remove_entity",
            ServerMsg::PlayerRespawn { .. } => "player_respawn",
            ServerMsg::RoundOver { .. } => "round_over",
            ServerMsg::RoundStart { .. } => "round_start",
        }
    }
}

/// Wire representation of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Player(PlayerSnapshot),
    Laser(LaserSnapshot),
}

impl EntitySnapshot {
    pub fn id(&self) -> Uuid {
        match self {
            EntitySnapshot::Player(p) => p.id,
            EntitySnapshot::Laser(l) => l.id,
        }
    }
}

/// Player state on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub icon: char,
    pub position: Coordinate,
}

/// Laser state on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub position: Coordinate,
    pub direction: Direction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"move","direction":"left"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Move {
                direction: Direction::Left
            }
        );

        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"connect","id":"11111111-1111-1111-1111-111111111111","name":"Al1"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMsg::Connect { ref name, .. } if name == "Al1"));
    }

    #[test]
    fn round_over_carries_rfc3339_timestamp() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = ServerMsg::RoundOver {
            round_winner_id: Uuid::nil(),
            new_round_at: at,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "round_over");
        assert_eq!(json["new_round_at"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn entity_snapshots_are_tagged_by_kind() {
        let snapshot = EntitySnapshot::Player(PlayerSnapshot {
            id: Uuid::nil(),
            name: "Al1".into(),
            icon: 'A',
            position: Coordinate::ORIGIN,
        });
        let json = serde_json::to_value(ServerMsg::AddEntity { entity: snapshot }).unwrap();
        assert_eq!(json["entity"]["kind"], "player");
        assert_eq!(json["entity"]["icon"], "A");
    }

    #[test]
    fn step_moves_one_cell() {
        let c = Coordinate::new(2, 3);
        assert_eq!(c.step(Direction::Up), Coordinate::new(2, 2));
        assert_eq!(c.step(Direction::Right), Coordinate::new(3, 3));
        assert_eq!(c.step(Direction::Stop), c);
    }
}
