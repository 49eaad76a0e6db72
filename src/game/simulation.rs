//! World simulation and authoritative tick loop

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::ws::protocol::{Coordinate, Direction};

use super::{Change, Entity, Intent, Laser, World, WorldState};

/// Attempts at finding a free cell before falling back to the origin
const SPAWN_ATTEMPTS: usize = 32;

/// Consumes intents and advances the world
pub struct Simulation {
    world: Arc<World>,
    intents: mpsc::Receiver<Intent>,
    settings: GameSettings,
    rng: ChaCha8Rng,
}

impl Simulation {
    pub fn new(world: Arc<World>, intents: mpsc::Receiver<Intent>, settings: GameSettings) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        Self {
            world,
            intents,
            settings,
            rng,
        }
    }

    /// Run the tick loop until the intent queue closes
    pub async fn run(mut self) {
        info!(tick_ms = self.settings.tick.as_millis() as u64, "World simulation started");

        let mut tick_interval = interval(self.settings.tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain intent queue
            let mut pending = Vec::new();
            let mut closed = false;
            loop {
                match self.intents.try_recv() {
                    Ok(intent) => pending.push(intent),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }

            let world = self.world.clone();
            let changes = {
                let mut state = world.write();
                self.step(&mut state, pending, SystemTime::now())
            };
            world.emit(changes);

            if closed {
                info!("Intent queue closed, stopping simulation");
                break;
            }
        }
    }

    /// Advance the world by one tick
    pub fn step(
        &mut self,
        state: &mut WorldState,
        intents: Vec<Intent>,
        now: SystemTime,
    ) -> Vec<Change> {
        let mut changes = Vec::new();

        if matches!(state.new_round_at, Some(at) if now >= at) {
            self.start_round(state, &mut changes);
        }

        for intent in intents {
            self.apply_intent(state, intent, now, &mut changes);
        }

        if !state.is_round_over() {
            self.advance_lasers(state, now, &mut changes);
        }

        changes
    }

    fn apply_intent(
        &mut self,
        state: &mut WorldState,
        intent: Intent,
        now: SystemTime,
        changes: &mut Vec<Change>,
    ) {
        if state.is_round_over() {
            return;
        }

        match intent {
            Intent::Move {
                player_id,
                direction,
            } => {
                if direction == Direction::Stop {
                    return;
                }
                let target = match state.get(&player_id) {
                    Some(Entity::Player(p))
                        if cooled_down(p.last_move, now, self.settings.move_cooldown) =>
                    {
                        p.position.step(direction)
                    }
                    _ => return,
                };
                if !state.in_bounds(target) || state.wall_at(target) {
                    return;
                }
                if let Some(Entity::Player(p)) = state.get_mut(&player_id) {
                    p.position = target;
                    p.last_move = Some(now);
                    changes.push(Change::Move {
                        entity: Entity::Player(p.clone()),
                    });
                }
            }
            Intent::Laser {
                owner_id,
                laser_id,
                direction,
            } => {
                if direction == Direction::Stop || state.contains(&laser_id) {
                    return;
                }
                let position = match state.get_mut(&owner_id) {
                    Some(Entity::Player(p))
                        if cooled_down(p.last_fire, now, self.settings.laser_cooldown) =>
                    {
                        p.last_fire = Some(now);
                        p.position
                    }
                    _ => return,
                };
                let laser = Laser {
                    id: laser_id,
                    owner_id,
                    position,
                    direction,
                    travelled: 0,
                };
                state.add_entity(laser.clone());
                changes.push(Change::AddEntity {
                    entity: Entity::Laser(laser),
                });
            }
        }
    }

    fn advance_lasers(&mut self, state: &mut WorldState, now: SystemTime, changes: &mut Vec<Change>) {
        let lasers: Vec<Uuid> = state
            .entities()
            .filter_map(|e| match e {
                Entity::Laser(l) => Some(l.id),
                _ => None,
            })
            .collect();

        for id in lasers {
            // A hit may have ended the round
            if state.is_round_over() {
                break;
            }

            let (owner_id, next, travelled) = match state.get(&id) {
                Some(Entity::Laser(l)) => (l.owner_id, l.position.step(l.direction), l.travelled + 1),
                _ => continue,
            };

            if travelled > self.settings.laser_range || !state.in_bounds(next) || state.wall_at(next)
            {
                state.remove_entity(id);
                changes.push(Change::RemoveEntity { id });
                continue;
            }

            if let Some(victim) = state.player_at(next, owner_id) {
                state.remove_entity(id);
                changes.push(Change::RemoveEntity { id });
                self.resolve_hit(state, victim, owner_id, now, changes);
                continue;
            }

            if let Some(Entity::Laser(l)) = state.get_mut(&id) {
                l.position = next;
                l.travelled = travelled;
                changes.push(Change::Move {
                    entity: Entity::Laser(l.clone()),
                });
            }
        }
    }

    fn resolve_hit(
        &mut self,
        state: &mut WorldState,
        victim: Uuid,
        killer: Uuid,
        now: SystemTime,
        changes: &mut Vec<Change>,
    ) {
        let spawn = self.spawn_point(state);
        if let Some(Entity::Player(p)) = state.get_mut(&victim) {
            p.position = spawn;
            changes.push(Change::PlayerRespawn {
                player: p.clone(),
                killed_by: killer,
            });
        }

        // Lasers outlive disconnected owners; only credit live players
        if !matches!(state.get(&killer), Some(Entity::Player(_))) {
            return;
        }

        let score = state.score.entry(killer).or_insert(0);
        *score += 1;
        debug!(player_id = %killer, score = *score, "Player scored");

        if *score >= self.settings.score_to_win {
            state.round_winner = Some(killer);
            state.new_round_at = Some(now + self.settings.round_over_delay);
            info!(winner_id = %killer, "Round over");
            changes.push(Change::RoundOver);
        }
    }

    fn start_round(&mut self, state: &mut WorldState, changes: &mut Vec<Change>) {
        state.new_round_at = None;
        state.score.clear();

        let mut lasers = Vec::new();
        let mut players = Vec::new();
        for entity in state.entities() {
            match entity {
                Entity::Laser(l) => lasers.push(l.id),
                Entity::Player(p) => players.push(p.id),
                Entity::Wall(_) => {}
            }
        }

        for id in lasers {
            state.remove_entity(id);
            changes.push(Change::RemoveEntity { id });
        }

        for id in players {
            let spawn = self.spawn_point(state);
            if let Some(Entity::Player(p)) = state.get_mut(&id) {
                p.position = spawn;
                p.last_move = None;
                p.last_fire = None;
            }
        }

        info!(player_count = state.players().count(), "Round started");
        changes.push(Change::RoundStart);
    }

    /// Random cell free of walls and players
    fn spawn_point(&mut self, state: &WorldState) -> Coordinate {
        let r = state.arena_radius;
        for _ in 0..SPAWN_ATTEMPTS {
            let at = Coordinate::new(self.rng.gen_range(-r..=r), self.rng.gen_range(-r..=r));
            if !state.wall_at(at) && state.player_at(at, Uuid::nil()).is_none() {
                return at;
            }
        }
        Coordinate::ORIGIN
    }
}

fn cooled_down(last: Option<SystemTime>, now: SystemTime, cooldown: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now
            .duration_since(at)
            .map(|elapsed| elapsed >= cooldown)
            .unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Player, Wall, WorldState};

    fn settings() -> GameSettings {
        GameSettings {
            arena_radius: 10,
            score_to_win: 2,
            laser_range: 5,
            seed: 7,
            ..Default::default()
        }
    }

    fn simulation() -> Simulation {
        let (world, rx) = World::with_state(WorldState::new(10), 8);
        Simulation::new(world, rx.intents, settings())
    }

    fn spawn_player(state: &mut WorldState, x: i32, y: i32) -> Uuid {
        let id = Uuid::new_v4();
        state.add_entity(Player::new(id, "p".into(), 'P', Coordinate::new(x, y)));
        id
    }

    fn position(state: &WorldState, id: Uuid) -> Coordinate {
        state.get(&id).map(Entity::position).unwrap()
    }

    #[test]
    fn move_steps_one_cell_and_respects_walls() {
        let mut sim = simulation();
        let mut state = WorldState::new(10);
        let id = spawn_player(&mut state, 0, 0);
        state.add_entity(Wall {
            id: Uuid::new_v4(),
            position: Coordinate::new(0, -1),
        });
        let now = SystemTime::now();

        let changes = sim.step(
            &mut state,
            vec![Intent::Move {
                player_id: id,
                direction: Direction::Up,
            }],
            now,
        );
        assert!(changes.is_empty());
        assert_eq!(position(&state, id), Coordinate::ORIGIN);

        let changes = sim.step(
            &mut state,
            vec![Intent::Move {
                player_id: id,
                direction: Direction::Right,
            }],
            now,
        );
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], Change::Move { entity } if entity.id() == id));
        assert_eq!(position(&state, id), Coordinate::new(1, 0));
    }

    #[test]
    fn move_cooldown_throttles_repeated_moves() {
        let mut sim = simulation();
        let mut state = WorldState::new(10);
        let id = spawn_player(&mut state, 0, 0);
        let now = SystemTime::now();
        let right = || Intent::Move {
            player_id: id,
            direction: Direction::Right,
        };

        sim.step(&mut state, vec![right(), right()], now);
        assert_eq!(position(&state, id), Coordinate::new(1, 0));

        sim.step(&mut state, vec![right()], now + Duration::from_secs(1));
        assert_eq!(position(&state, id), Coordinate::new(2, 0));
    }

    #[test]
    fn laser_hit_respawns_victim_and_scores() {
        let mut sim = simulation();
        let mut state = WorldState::new(10);
        let shooter = spawn_player(&mut state, 0, 0);
        let victim = spawn_player(&mut state, 2, 0);
        let laser_id = Uuid::new_v4();
        let now = SystemTime::now();

        let changes = sim.step(
            &mut state,
            vec![Intent::Laser {
                owner_id: shooter,
                laser_id,
                direction: Direction::Right,
            }],
            now,
        );
        // Spawned then advanced one cell in the same tick
        assert!(matches!(&changes[0], Change::AddEntity { entity } if entity.id() == laser_id));
        assert!(matches!(&changes[1], Change::Move { entity } if entity.position() == Coordinate::new(1, 0)));

        let changes = sim.step(&mut state, Vec::new(), now);
        assert_eq!(changes[0], Change::RemoveEntity { id: laser_id });
        match &changes[1] {
            Change::PlayerRespawn { player, killed_by } => {
                assert_eq!(player.id, victim);
                assert_eq!(*killed_by, shooter);
            }
            other => panic!("unexpected change {:?}", other),
        }
        assert_eq!(state.score.get(&shooter), Some(&1));
        assert!(!state.contains(&laser_id));
    }

    #[test]
    fn laser_expires_after_range() {
        let mut sim = simulation();
        let mut state = WorldState::new(10);
        let shooter = spawn_player(&mut state, 0, 0);
        let laser_id = Uuid::new_v4();
        let now = SystemTime::now();

        sim.step(
            &mut state,
            vec![Intent::Laser {
                owner_id: shooter,
                laser_id,
                direction: Direction::Down,
            }],
            now,
        );
        for _ in 0..4 {
            sim.step(&mut state, Vec::new(), now);
        }
        assert!(state.contains(&laser_id));

        let changes = sim.step(&mut state, Vec::new(), now);
        assert_eq!(changes, vec![Change::RemoveEntity { id: laser_id }]);
    }

    #[test]
    fn reaching_score_target_ends_and_restarts_round() {
        let mut sim = simulation();
        let mut state = WorldState::new(10);
        let shooter = spawn_player(&mut state, 0, 0);
        let victim = spawn_player(&mut state, 0, 2);
        state.score.insert(shooter, 1);
        let now = SystemTime::now();

        sim.step(
            &mut state,
            vec![Intent::Laser {
                owner_id: shooter,
                laser_id: Uuid::new_v4(),
                direction: Direction::Down,
            }],
            now,
        );
        let changes = sim.step(&mut state, Vec::new(), now);
        assert!(changes.contains(&Change::RoundOver));
        assert!(changes
            .iter()
            .any(|c| matches!(c, Change::PlayerRespawn { player, .. } if player.id == victim)));
        assert_eq!(state.round_winner, Some(shooter));
        let resume_at = state.new_round_at.unwrap();

        // Intents are ignored while the round is over
        let changes = sim.step(
            &mut state,
            vec![Intent::Move {
                player_id: shooter,
                direction: Direction::Right,
            }],
            now + Duration::from_secs(1),
        );
        assert!(changes.is_empty());

        let changes = sim.step(&mut state, Vec::new(), resume_at);
        assert_eq!(changes.last(), Some(&Change::RoundStart));
        assert!(!state.is_round_over());
        assert!(state.score.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_queued_intents_and_emits_changes() {
        let mut state = WorldState::new(10);
        let id = spawn_player(&mut state, 0, 0);
        let (world, mut rx) = World::with_state(state, 8);
        let sim = Simulation::new(world.clone(), rx.intents, settings());
        tokio::spawn(sim.run());

        world
            .enqueue(Intent::Move {
                player_id: id,
                direction: Direction::Left,
            })
            .unwrap();

        let change = rx.changes.recv().await.unwrap();
        assert!(matches!(change, Change::Move { entity } if entity.position() == Coordinate::new(-1, 0)));
    }
}
