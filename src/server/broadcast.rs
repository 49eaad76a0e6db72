//! Fan-out of outbound messages with failure isolation

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::ws::protocol::ServerMsg;

use super::GameServer;

impl GameServer {
    /// Deliver `msg` to every registered client.
    ///
    /// Clients whose delivery fails are evicted once the registry lock is
    /// released, their player is removed from the world, and a `RemoveEntity`
    /// for each is broadcast in turn.
    pub async fn broadcast(&self, msg: ServerMsg) {
        let mut pending = VecDeque::from([msg]);

        while let Some(msg) = pending.pop_front() {
            let failed = self.registry.deliver(&msg).await;
            debug!(kind = msg.kind(), failed = failed.len(), "Broadcast message");

            for id in failed {
                if self.registry.evict(id).await.is_none() {
                    continue;
                }
                warn!(player_id = %id, "Removing client after failed delivery");
                self.world.write().remove_entity(id);
                pending.push_back(ServerMsg::RemoveEntity { id });
            }
        }
    }
}
