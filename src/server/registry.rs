//! Registry of connected clients

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::ServerError;

/// A connection that completed the handshake
#[derive(Debug)]
pub struct Client {
    pub id: Uuid,
    outbound: mpsc::Sender<ServerMsg>,
    cancel: CancellationToken,
}

impl Client {
    pub fn new(id: Uuid, outbound: mpsc::Sender<ServerMsg>, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
        }
    }

    /// Queue a message on this client's outbound stream
    pub async fn send(&self, msg: ServerMsg) -> Result<(), ServerError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| ServerError::SendFailed)
    }
}

/// Connected clients indexed by player id.
///
/// Delivery holds the shared lock across sends; register and evict take the
/// exclusive lock and so wait for in-flight deliveries.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client: Client) {
        let mut clients = self.clients.write().await;
        debug!(player_id = %client.id, "Client registered");
        clients.insert(client.id, client);
    }

    /// Remove a client and cancel its connection.
    ///
    /// Returns `None` if it was already gone, in which case nothing is cancelled.
    pub async fn evict(&self, id: Uuid) -> Option<Client> {
        let client = self.clients.write().await.remove(&id)?;
        client.cancel.cancel();
        debug!(player_id = %id, "Client evicted");
        Some(client)
    }

    /// Attempt delivery to every client, returning the ids that failed
    pub async fn deliver(&self, msg: &ServerMsg) -> Vec<Uuid> {
        let clients = self.clients.read().await;
        let mut failed = Vec::new();
        for client in clients.values() {
            if let Err(e) = client.send(msg.clone()).await {
                warn!(player_id = %client.id, error = %e, kind = msg.kind(), "Broadcast delivery failed");
                failed.push(client.id);
            }
        }
        failed
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
impl ClientRegistry {
    pub async fn contains(&self, id: &Uuid) -> bool {
        self.clients.read().await.contains_key(id)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: Uuid) -> (Client, mpsc::Receiver<ServerMsg>, CancellationToken) {
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        (Client::new(id, tx, token.clone()), rx, token)
    }

    #[tokio::test]
    async fn evict_cancels_exactly_once() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let (c, _rx, token) = client(id);
        registry.register(c).await;
        assert!(registry.contains(&id).await);

        assert!(registry.evict(id).await.is_some());
        assert!(token.is_cancelled());
        assert!(registry.is_empty().await);

        assert!(registry.evict(id).await.is_none());
    }

    #[tokio::test]
    async fn evicting_unknown_client_is_noop() {
        let registry = ClientRegistry::new();
        let (c, _rx, token) = client(Uuid::new_v4());
        registry.register(c).await;

        assert!(registry.evict(Uuid::new_v4()).await.is_none());
        assert!(!token.is_cancelled());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn deliver_continues_past_failures() {
        let registry = ClientRegistry::new();
        let broken = Uuid::new_v4();
        let (c, rx, _) = client(broken);
        drop(rx);
        registry.register(c).await;

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (c, rx, _) = client(Uuid::new_v4());
            registry.register(c).await;
            receivers.push(rx);
        }

        let msg = ServerMsg::RemoveEntity { id: Uuid::nil() };
        let failed = registry.deliver(&msg).await;

        assert_eq!(failed, vec![broken]);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), msg);
        }
        // Delivery never evicts on its own
        assert_eq!(registry.len().await, 4);
    }
}
