//! Arena entities

use std::time::SystemTime;
use uuid::Uuid;

use crate::ws::protocol::{Coordinate, Direction};

/// Connected player (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub icon: char,
    pub position: Coordinate,
    pub last_move: Option<SystemTime>,
    pub last_fire: Option<SystemTime>,
}

impl Player {
    pub fn new(id: Uuid, name: String, icon: char, position: Coordinate) -> Self {
        Self {
            id,
            name,
            icon,
            position,
            last_move: None,
            last_fire: None,
        }
    }
}

/// Laser in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Laser {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub position: Coordinate,
    pub direction: Direction,
    /// Cells travelled so far
    pub travelled: u32,
}

/// Static obstacle
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    pub id: Uuid,
    pub position: Coordinate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Player(Player),
    Laser(Laser),
    Wall(Wall),
}

impl Entity {
    pub fn id(&self) -> Uuid {
        match self {
            Entity::Player(p) => p.id,
            Entity::Laser(l) => l.id,
            Entity::Wall(w) => w.id,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            Entity::Player(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
impl Entity {
    pub fn position(&self) -> Coordinate {
        match self {
            Entity::Player(p) => p.position,
            Entity::Laser(l) => l.position,
            Entity::Wall(w) => w.position,
        }
    }
}

impl From<Player> for Entity {
    fn from(player: Player) -> Self {
        Entity::Player(player)
    }
}

impl From<Laser> for Entity {
    fn from(laser: Laser) -> Self {
        Entity::Laser(laser)
    }
}

impl From<Wall> for Entity {
    fn from(wall: Wall) -> Self {
        Entity::Wall(wall)
    }
}
