//! Change stream consumer: translates world changes and broadcasts them

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::game::snapshot::{collect_players, entity_snapshot, player_snapshot};
use crate::game::{Change, Entity, World};
use crate::ws::protocol::{EntitySnapshot, ServerMsg};

use super::GameServer;

/// Reasons a change cannot be turned into a message
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("entity {0} has no wire representation")]
    Unrepresentable(Uuid),

    #[error("round over without a round winner")]
    NoRoundWinner,

    #[error("round over without a new round time")]
    NoNewRoundTime,

    #[error("unable to represent new round timestamp {0:?}")]
    Timestamp(SystemTime),
}

/// Build the outbound message for a change.
///
/// Round changes read the world under its read lock; the lock is released
/// before this returns.
pub fn translate(change: Change, world: &World) -> Result<ServerMsg, TranslateError> {
    match change {
        Change::Move { entity } => Ok(ServerMsg::UpdateEntity {
            entity: snapshot_of(&entity)?,
        }),
        Change::AddEntity { entity } => Ok(ServerMsg::AddEntity {
            entity: snapshot_of(&entity)?,
        }),
        Change::RemoveEntity { id } => Ok(ServerMsg::RemoveEntity { id }),
        Change::PlayerRespawn { player, killed_by } => Ok(ServerMsg::PlayerRespawn {
            player: player_snapshot(&player),
            killed_by_id: killed_by,
        }),
        Change::RoundOver => {
            let state = world.read();
            let round_winner_id = state.round_winner.ok_or(TranslateError::NoRoundWinner)?;
            let at = state.new_round_at.ok_or(TranslateError::NoNewRoundTime)?;
            Ok(ServerMsg::RoundOver {
                round_winner_id,
                new_round_at: to_datetime(at)?,
            })
        }
        Change::RoundStart => Ok(ServerMsg::RoundStart {
            players: collect_players(&world.read()),
        }),
    }
}

fn snapshot_of(entity: &Entity) -> Result<EntitySnapshot, TranslateError> {
    entity_snapshot(entity).ok_or_else(|| TranslateError::Unrepresentable(entity.id()))
}

fn to_datetime(at: SystemTime) -> Result<DateTime<Utc>, TranslateError> {
    let since_epoch = at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| TranslateError::Timestamp(at))?;
    let secs = i64::try_from(since_epoch.as_secs()).map_err(|_| TranslateError::Timestamp(at))?;
    DateTime::from_timestamp(secs, since_epoch.subsec_nanos()).ok_or(TranslateError::Timestamp(at))
}

/// Drain the change stream, broadcasting each change in emission order
pub async fn watch_changes(server: Arc<GameServer>, mut changes: mpsc::UnboundedReceiver<Change>) {
    info!("Change watcher started");

    while let Some(change) = changes.recv().await {
        let msg = match translate(change, server.world()) {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "Skipping broadcast for untranslatable change");
                continue;
            }
        };
        server.broadcast(msg).await;
    }

    info!("Change stream closed, change watcher stopping");
}
