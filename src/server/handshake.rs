//! Connect handshake: validate, spawn, snapshot, announce

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::snapshot::{collect_entities, player_snapshot};
use crate::game::Player;
use crate::ws::protocol::{Coordinate, EntitySnapshot, ServerMsg};

use super::{Client, GameServer, ServerError};

/// Display icon for a player name: its uppercased first character.
///
/// Names must be one or more ASCII alphanumerics.
pub fn player_icon(name: &str) -> Result<char, ServerError> {
    let mut chars = name.chars();
    let first = chars.next().ok_or(ServerError::InvalidName)?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServerError::InvalidName);
    }
    Ok(first.to_ascii_uppercase())
}

impl GameServer {
    /// Onboard a connection that sent `Connect`.
    ///
    /// On success the player exists in the world, the connection has received
    /// its private `Initialize`, it is registered under the returned id, and
    /// an `AddEntity` for it has been broadcast to every client including
    /// itself. Validation failures leave no trace in the world.
    pub async fn handshake(
        &self,
        id: &str,
        name: &str,
        outbound: mpsc::Sender<ServerMsg>,
        cancel: CancellationToken,
    ) -> Result<Uuid, ServerError> {
        let player_id = Uuid::parse_str(id)?;
        let icon = player_icon(name)?;

        tokio::time::sleep(self.settings.handshake_delay).await;

        let player = Player::new(player_id, name.to_string(), icon, Coordinate::ORIGIN);

        let entities = {
            let mut state = self.world.write();
            if state.contains(&player_id) {
                return Err(ServerError::DuplicateId(player_id));
            }
            state.add_entity(player.clone());
            collect_entities(&state)
        };

        if let Err(e) = outbound.send(ServerMsg::Initialize { entities }).await {
            warn!(player_id = %player_id, error = %e, "Failed to send initialize, rolling back");
            self.remove_player(player_id).await;
            return Err(ServerError::SendFailed);
        }

        info!(player_id = %player_id, name = %name, "Sent initialize message");

        self.registry
            .register(Client::new(player_id, outbound, cancel))
            .await;

        self.broadcast(ServerMsg::AddEntity {
            entity: EntitySnapshot::Player(player_snapshot(&player)),
        })
        .await;

        Ok(player_id)
    }
}
