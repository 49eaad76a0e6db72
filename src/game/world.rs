//! Authoritative world state, change stream and intent queue

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::GameSettings;
use crate::ws::protocol::Coordinate;

use super::{Change, Entity, Intent, Player, Wall};

/// Pillar cells placed in every arena (skipped if outside the radius)
const PILLARS: [(i32, i32); 4] = [(-5, -5), (5, -5), (-5, 5), (5, 5)];

/// Mutable world data, only reachable through the world lock
#[derive(Debug, Default)]
pub struct WorldState {
    entities: HashMap<Uuid, Entity>,
    pub score: HashMap<Uuid, u32>,
    pub round_winner: Option<Uuid>,
    /// Set while a round is over
    pub new_round_at: Option<SystemTime>,
    pub arena_radius: i32,
}

impl WorldState {
    pub fn new(arena_radius: i32) -> Self {
        Self {
            arena_radius,
            ..Default::default()
        }
    }

    /// Insert or replace an entity
    pub fn add_entity(&mut self, entity: impl Into<Entity>) -> Option<Entity> {
        let entity = entity.into();
        self.entities.insert(entity.id(), entity)
    }

    pub fn remove_entity(&mut self, id: Uuid) -> Option<Entity> {
        let removed = self.entities.remove(&id);
        if let Some(Entity::Player(_)) = removed {
            self.score.remove(&id);
        }
        removed
    }

    pub fn get(&self, id: &Uuid) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.entities.values().filter_map(Entity::as_player)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn in_bounds(&self, at: Coordinate) -> bool {
        at.x.abs() <= self.arena_radius && at.y.abs() <= self.arena_radius
    }

    pub fn wall_at(&self, at: Coordinate) -> bool {
        self.entities
            .values()
            .any(|e| matches!(e, Entity::Wall(w) if w.position == at))
    }

    /// Player standing on `at`, other than `except`
    pub fn player_at(&self, at: Coordinate, except: Uuid) -> Option<Uuid> {
        self.players()
            .find(|p| p.position == at && p.id != except)
            .map(|p| p.id)
    }

    pub fn is_round_over(&self) -> bool {
        self.new_round_at.is_some()
    }
}

/// Receiving ends of the world channels, each consumed once
pub struct WorldReceivers {
    pub changes: mpsc::UnboundedReceiver<Change>,
    pub intents: mpsc::Receiver<Intent>,
}

/// Intent enqueue errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("intent queue is full")]
    Full,

    #[error("intent queue is closed")]
    Closed,
}

/// Shared world handle
pub struct World {
    state: RwLock<WorldState>,
    changes: mpsc::UnboundedSender<Change>,
    intents: mpsc::Sender<Intent>,
}

impl World {
    /// Create a world with the default pillar layout
    pub fn new(settings: &GameSettings) -> (Arc<Self>, WorldReceivers) {
        let mut state = WorldState::new(settings.arena_radius);
        for (x, y) in PILLARS {
            let position = Coordinate::new(x, y);
            if state.in_bounds(position) {
                state.add_entity(Wall {
                    id: Uuid::new_v4(),
                    position,
                });
            }
        }
        Self::with_state(state, settings.intent_buffer)
    }

    /// Create a world around an existing state
    pub fn with_state(state: WorldState, intent_buffer: usize) -> (Arc<Self>, WorldReceivers) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (intents_tx, intents_rx) = mpsc::channel(intent_buffer);

        let world = Arc::new(Self {
            state: RwLock::new(state),
            changes: changes_tx,
            intents: intents_tx,
        });

        (
            world,
            WorldReceivers {
                changes: changes_rx,
                intents: intents_rx,
            },
        )
    }

    /// Shared access to the world state
    pub fn read(&self) -> RwLockReadGuard<'_, WorldState> {
        self.state.read()
    }

    /// Exclusive access to the world state
    pub fn write(&self) -> RwLockWriteGuard<'_, WorldState> {
        self.state.write()
    }

    /// Queue an intent without waiting on the simulation
    pub fn enqueue(&self, intent: Intent) -> Result<(), IntentError> {
        self.intents.try_send(intent).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IntentError::Full,
            mpsc::error::TrySendError::Closed(_) => IntentError::Closed,
        })
    }

    /// Publish changes to the change stream
    pub fn emit(&self, changes: impl IntoIterator<Item = Change>) {
        for change in changes {
            if self.changes.send(change).is_err() {
                debug!("Change stream closed, dropping change");
                return;
            }
        }
    }
}
