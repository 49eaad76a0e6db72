//! Per-connection request loop

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{Intent, IntentError};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::{GameServer, ServerError};

enum ConnectionState {
    /// Waiting for `Connect`; holds the outbound stream until the handshake takes it
    Unauthenticated(mpsc::Sender<ServerMsg>),
    Connected(Uuid),
}

impl GameServer {
    /// Drive one connection until it terminates.
    ///
    /// `outbound` feeds the connection's writer and `requests` yields decoded
    /// requests; a stream error or end of stream is a disconnect. The returned
    /// error is the terminal cause. A connected player is evicted and removed
    /// on every exit unless a broadcast already evicted it.
    pub async fn serve_connection<S>(
        &self,
        outbound: mpsc::Sender<ServerMsg>,
        requests: S,
    ) -> Result<(), ServerError>
    where
        S: Stream<Item = Result<ClientMsg, ServerError>> + Unpin,
    {
        let cancel = self.connection_token();
        let mut connected = None;

        let result = self
            .drive_connection(outbound, requests, &cancel, &mut connected)
            .await;

        if let Some(id) = connected {
            if self.registry.evict(id).await.is_some() {
                self.remove_player(id).await;
            }
        }

        result
    }

    async fn drive_connection<S>(
        &self,
        outbound: mpsc::Sender<ServerMsg>,
        mut requests: S,
        cancel: &CancellationToken,
        connected: &mut Option<Uuid>,
    ) -> Result<(), ServerError>
    where
        S: Stream<Item = Result<ClientMsg, ServerError>> + Unpin,
    {
        let limiter = PlayerRateLimiter::new(self.settings.input_rate_limit);
        let mut state = ConnectionState::Unauthenticated(outbound);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Connection cancelled");
                    return Err(ServerError::Cancelled);
                }
                next = requests.next() => next.unwrap_or(Err(ServerError::Disconnected)),
            };

            let request = match next {
                Ok(request) => request,
                Err(e) => {
                    info!(error = %e, "Receive error");
                    return Err(e);
                }
            };

            state = match state {
                ConnectionState::Unauthenticated(outbound) => match request {
                    ClientMsg::Connect { id, name } => {
                        let player_id = self
                            .handshake(&id, &name, outbound, cancel.clone())
                            .await
                            .map_err(|e| {
                                warn!(id = %id, error = %e, "Error when connecting");
                                e
                            })?;
                        *connected = Some(player_id);
                        ConnectionState::Connected(player_id)
                    }
                    _ => {
                        debug!("Ignoring request before connect");
                        ConnectionState::Unauthenticated(outbound)
                    }
                },
                ConnectionState::Connected(player_id) => {
                    self.dispatch(player_id, request, &limiter)?;
                    ConnectionState::Connected(player_id)
                }
            };
        }
    }

    /// Turn a connected player's request into a world intent
    fn dispatch(
        &self,
        player_id: Uuid,
        request: ClientMsg,
        limiter: &PlayerRateLimiter,
    ) -> Result<(), ServerError> {
        let intent = match request {
            ClientMsg::Connect { .. } => {
                debug!(player_id = %player_id, "Ignoring repeated connect");
                return Ok(());
            }
            ClientMsg::Move { direction } => Intent::Move {
                player_id,
                direction,
            },
            ClientMsg::Laser { id, direction } => match Uuid::parse_str(&id) {
                Ok(laser_id) => Intent::Laser {
                    owner_id: player_id,
                    laser_id,
                    direction,
                },
                Err(_) => {
                    debug!(player_id = %player_id, laser_id = %id, "Dropping laser with invalid id");
                    return Ok(());
                }
            },
        };

        if !limiter.check_input() {
            warn!(player_id = %player_id, "Rate limited input message");
            return Ok(());
        }

        match self.world.enqueue(intent) {
            Ok(()) => Ok(()),
            Err(IntentError::Full) => {
                warn!(player_id = %player_id, "Intent queue full, dropping request");
                Ok(())
            }
            Err(IntentError::Closed) => Err(ServerError::WorldClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{connect_client, test_server};
    use crate::ws::protocol::Direction;
    use futures::channel::mpsc as futures_mpsc;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    type Requests = futures_mpsc::UnboundedSender<Result<ClientMsg, ServerError>>;

    struct Connection {
        requests: Requests,
        outbound: mpsc::Receiver<ServerMsg>,
        task: JoinHandle<Result<(), ServerError>>,
    }

    fn open(server: &Arc<GameServer>) -> Connection {
        let (requests, request_rx) = futures_mpsc::unbounded();
        let (tx, outbound) = mpsc::channel(32);
        let server = server.clone();
        let task = tokio::spawn(async move { server.serve_connection(tx, request_rx).await });
        Connection {
            requests,
            outbound,
            task,
        }
    }

    fn send(conn: &Connection, msg: ClientMsg) {
        conn.requests.unbounded_send(Ok(msg)).unwrap();
    }

    fn connect_msg(id: Uuid) -> ClientMsg {
        ClientMsg::Connect {
            id: id.to_string(),
            name: "Al1".into(),
        }
    }

    /// Connect and consume the Initialize + own AddEntity
    async fn open_connected(server: &Arc<GameServer>, id: Uuid) -> Connection {
        let mut conn = open(server);
        send(&conn, connect_msg(id));
        assert!(matches!(conn.outbound.recv().await, Some(ServerMsg::Initialize { .. })));
        assert!(matches!(conn.outbound.recv().await, Some(ServerMsg::AddEntity { .. })));
        conn
    }

    #[tokio::test]
    async fn requests_before_connect_are_ignored() {
        let (server, mut rx) = test_server();
        let mut conn = open(&server);
        let id = Uuid::new_v4();

        send(
            &conn,
            ClientMsg::Move {
                direction: Direction::Up,
            },
        );
        send(
            &conn,
            ClientMsg::Laser {
                id: Uuid::new_v4().to_string(),
                direction: Direction::Up,
            },
        );
        send(&conn, connect_msg(id));

        assert!(matches!(conn.outbound.recv().await, Some(ServerMsg::Initialize { .. })));
        assert!(server.registry().contains(&id).await);
        assert!(rx.intents.try_recv().is_err());
    }

    #[tokio::test]
    async fn connected_requests_become_intents() {
        let (server, mut rx) = test_server();
        let id = Uuid::new_v4();
        let conn = open_connected(&server, id).await;
        let laser_id = Uuid::new_v4();

        send(
            &conn,
            ClientMsg::Move {
                direction: Direction::Left,
            },
        );
        send(
            &conn,
            ClientMsg::Laser {
                id: "garbage".into(),
                direction: Direction::Down,
            },
        );
        send(
            &conn,
            ClientMsg::Laser {
                id: laser_id.to_string(),
                direction: Direction::Down,
            },
        );

        assert_eq!(
            rx.intents.recv().await,
            Some(Intent::Move {
                player_id: id,
                direction: Direction::Left
            })
        );
        // The unparsable laser never reaches the queue
        assert_eq!(
            rx.intents.recv().await,
            Some(Intent::Laser {
                owner_id: id,
                laser_id,
                direction: Direction::Down
            })
        );
        assert!(!conn.task.is_finished());
    }

    #[tokio::test]
    async fn receive_failure_removes_player() {
        let (server, _rx) = test_server();
        let mut observer = connect_client(&server).await;
        let id = Uuid::new_v4();
        let conn = open_connected(&server, id).await;
        assert!(matches!(observer.outbound.recv().await, Some(ServerMsg::AddEntity { .. })));

        conn.requests
            .unbounded_send(Err(ServerError::Transport("reset".into())))
            .unwrap();
        let result = conn.task.await.unwrap();

        assert!(matches!(result, Err(ServerError::Transport(_))));
        assert!(!server.registry().contains(&id).await);
        assert!(!server.world().read().contains(&id));
        assert_eq!(
            observer.outbound.recv().await,
            Some(ServerMsg::RemoveEntity { id })
        );
    }

    #[tokio::test]
    async fn end_of_stream_before_connect_leaves_no_trace() {
        let (server, _rx) = test_server();
        let conn = open(&server);
        drop(conn.requests);

        let result = conn.task.await.unwrap();
        assert!(matches!(result, Err(ServerError::Disconnected)));
        assert_eq!(server.world().read().entity_count(), 0);
    }

    #[tokio::test]
    async fn handshake_failure_terminates_connection() {
        let (server, _rx) = test_server();
        let conn = open(&server);
        send(
            &conn,
            ClientMsg::Connect {
                id: Uuid::new_v4().to_string(),
                name: "no spaces".into(),
            },
        );

        let result = conn.task.await.unwrap();
        assert!(matches!(result, Err(ServerError::InvalidName)));
        assert!(server.registry().is_empty().await);
        assert_eq!(server.world().read().entity_count(), 0);
    }

    #[tokio::test]
    async fn eviction_cancels_the_loop() {
        let (server, _rx) = test_server();
        let id = Uuid::new_v4();
        let conn = open_connected(&server, id).await;

        server.registry().evict(id).await;
        let result = conn.task.await.unwrap();
        assert!(matches!(result, Err(ServerError::Cancelled)));
    }

    #[tokio::test]
    async fn shutdown_cancels_every_connection() {
        let (server, _rx) = test_server();
        let a = open_connected(&server, Uuid::new_v4()).await;
        let b = open(&server);

        server.shutdown();
        assert!(matches!(a.task.await.unwrap(), Err(ServerError::Cancelled)));
        assert!(matches!(b.task.await.unwrap(), Err(ServerError::Cancelled)));

        // Drained connections no longer count as connected players
        assert!(server.registry().is_empty().await);
        assert_eq!(server.world().read().entity_count(), 0);
    }

    #[tokio::test]
    async fn closed_world_terminates_connection() {
        let (server, rx) = test_server();
        let id = Uuid::new_v4();
        let conn = open_connected(&server, id).await;
        drop(rx);

        send(
            &conn,
            ClientMsg::Move {
                direction: Direction::Up,
            },
        );
        assert!(matches!(conn.task.await.unwrap(), Err(ServerError::WorldClosed)));
        assert!(!server.registry().contains(&id).await);
        assert!(!server.world().read().contains(&id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receive_failure_racing_broadcast_eviction_is_announced_once() {
        for _ in 0..16 {
            let (server, _rx) = test_server();
            let mut observer = connect_client(&server).await;
            let id = Uuid::new_v4();
            let Connection {
                requests,
                outbound,
                task,
            } = open_connected(&server, id).await;

            // Deliveries to this connection now fail
            drop(outbound);

            requests
                .unbounded_send(Err(ServerError::Transport("reset".into())))
                .unwrap();
            let notice = ServerMsg::RemoveEntity { id: Uuid::new_v4() };
            let (_, result) = tokio::join!(server.broadcast(notice), task);

            assert!(matches!(
                result.unwrap(),
                Err(ServerError::Transport(_)) | Err(ServerError::Cancelled)
            ));
            assert!(!server.registry().contains(&id).await);
            assert!(!server.world().read().contains(&id));

            let mut removals = 0;
            while let Ok(msg) = observer.outbound.try_recv() {
                if msg == (ServerMsg::RemoveEntity { id }) {
                    removals += 1;
                }
            }
            assert_eq!(removals, 1);
        }
    }
}
