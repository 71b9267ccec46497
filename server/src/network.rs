//! Datagram front for the session engine.
//!
//! Clients send bincode-encoded [`Packet::Request`]s and receive one
//! [`Packet::Response`] per request, tagged with the same id. Subscribing to
//! a game makes the server push [`Packet::Event`]s to the subscribing address
//! until it unsubscribes or the game ends.

use crate::notifications::Subscription;
use crate::registry::SessionRegistry;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{GameError, GameId, LatLon, Packet, Request, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    Shutdown,
}

/// Messages queued for the sender task
#[derive(Debug)]
pub enum OutgoingMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    subscriptions: HashMap<(SocketAddr, GameId), Subscription>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<OutgoingMessage>,
    out_rx: Option<mpsc::UnboundedReceiver<OutgoingMessage>>,
}

impl Server {
    pub async fn bind(
        addr: &str,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            registry,
            subscriptions: HashMap::new(),
            server_tx,
            server_rx,
            out_tx,
            out_rx: Some(out_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that stops [`Server::run`] when given [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 8192];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut out_rx) = self.out_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(OutgoingMessage::SendPacket { packet, addr }) = out_rx.recv().await {
                if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(OutgoingMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let Packet::Request { id, request } = packet else {
            warn!("Unexpected packet type from client at {}", addr);
            return;
        };

        let response = match request {
            Request::ListenForRegionChange { game } => self.subscribe(game, addr).await,
            Request::Unlisten { game } => self.unsubscribe(game, addr),
            request => dispatch(&self.registry, request).await,
        };
        if let Response::Error(e) = &response {
            debug!("Request {} from {} failed: {}", id, addr, e);
        }

        self.send_packet(Packet::Response { id, response }, addr);
    }

    async fn subscribe(&mut self, game: GameId, addr: SocketAddr) -> Response {
        let session = match self.registry.find(game).await {
            Ok(session) => session,
            Err(e) => return Response::Error(e),
        };

        let out_tx = self.out_tx.clone();
        let subscription = session.listen(move |event| {
            let packet = Packet::Event(event);
            let _ = out_tx.send(OutgoingMessage::SendPacket { packet, addr });
        });

        // Finished listeners from ended games are dropped along the way
        self.subscriptions.retain(|_, s| s.is_active());
        if let Some(previous) = self.subscriptions.insert((addr, game), subscription) {
            previous.cancel();
        }
        info!("{} subscribed to game {}", addr, game);
        Response::Subscribed { game }
    }

    fn unsubscribe(&mut self, game: GameId, addr: SocketAddr) -> Response {
        match self.subscriptions.remove(&(addr, game)) {
            Some(subscription) => {
                subscription.cancel();
                info!("{} unsubscribed from game {}", addr, game);
                Response::Unsubscribed { game }
            }
            None => Response::Error(GameError::Validation(format!(
                "not subscribed to game {}",
                game
            ))),
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel();
        }
        Ok(())
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

/// Runs one request against the registry. Subscription requests need a
/// subscriber address and are refused here.
pub async fn dispatch(registry: &SessionRegistry, request: Request) -> Response {
    match request {
        Request::CreateUser {
            username,
            password,
            email,
        } => match registry
            .users()
            .create(&username, &password, email.as_deref())
            .await
        {
            Ok(user) => Response::User(user),
            Err(e) => Response::Error(e),
        },
        Request::Create {
            name,
            creator,
            lat,
            lon,
        } => match registry.create(&name, creator, lat, lon).await {
            Ok(session) => Response::Game(session.snapshot().await),
            Err(e) => Response::Error(e),
        },
        Request::Join {
            target,
            user,
            lat,
            lon,
        } => match join_position(lat, lon) {
            Ok(position) => registry.join(target, user, position).await.into(),
            Err(e) => Response::Error(e),
        },
        Request::Leave { game, user } => registry.leave(game, user).await.into(),
        Request::SetGeolocation {
            game,
            user,
            lon,
            lat,
        } => registry.set_geolocation(game, user, lon, lat).await.into(),
        Request::TransferTroopsToBase {
            game,
            user,
            region,
            amount,
        } => registry
            .transfer_troops_to_base(game, user, region, amount)
            .await
            .into(),
        Request::GetGame { game } => registry.get(game).await.into(),
        Request::ListenForRegionChange { .. } | Request::Unlisten { .. } => Response::Error(
            GameError::Validation("subscriptions need a subscriber address".into()),
        ),
    }
}

fn join_position(lat: Option<f64>, lon: Option<f64>) -> Result<Option<LatLon>, GameError> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => LatLon::new(lat, lon).map(Some),
        (None, None) => Ok(None),
        _ => Err(GameError::Validation(
            "lat and lon must be given together".into(),
        )),
    }
}
