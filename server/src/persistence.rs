//! Mirroring of in-memory state into a document store.
//!
//! In-memory session state is authoritative. Sessions hand document updates
//! to a [`Mirror`], which queues them on an unbounded channel and applies them
//! from a background task, retrying failed writes with a linear backoff.
//! Nothing on the capture/transfer/tick path waits for the store.

use bincode::{deserialize, serialize};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use shared::{GameId, GameSnapshot, Geolocation, RegionView, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode document: {0}")]
    Encode(#[from] bincode::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// `games` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDocument {
    pub id: GameId,
    pub name: String,
    pub users: Vec<UserId>,
    pub geolocations: BTreeMap<UserId, Option<Geolocation>>,
    pub regions: Vec<RegionView>,
    pub troops: BTreeMap<UserId, u32>,
    pub scores: BTreeMap<UserId, u64>,
    pub winner: Option<UserId>,
}

impl From<&GameSnapshot> for GameDocument {
    fn from(snapshot: &GameSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            users: snapshot.users.clone(),
            geolocations: snapshot.geolocations.clone(),
            regions: snapshot.regions.clone(),
            troops: snapshot.troops.clone(),
            scores: snapshot.scores.clone(),
            winner: snapshot.winner,
        }
    }
}

/// `users` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    pub id: UserId,
    pub username: String,
    /// Opaque credential supplied by the authentication layer
    pub credential: String,
    pub email: Option<String>,
}

/// Document store the engine mirrors into.
pub trait PersistenceGateway: Send + Sync + 'static {
    fn upsert_game(&self, doc: &GameDocument) -> Result<(), PersistenceError>;
    fn delete_game(&self, id: GameId) -> Result<(), PersistenceError>;
    fn upsert_user(&self, doc: &UserDocument) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    UpsertGame(GameDocument),
    DeleteGame(GameId),
    UpsertUser(UserDocument),
}

impl MirrorOp {
    fn apply(&self, gateway: &dyn PersistenceGateway) -> Result<(), PersistenceError> {
        match self {
            MirrorOp::UpsertGame(doc) => gateway.upsert_game(doc),
            MirrorOp::DeleteGame(id) => gateway.delete_game(*id),
            MirrorOp::UpsertUser(doc) => gateway.upsert_user(doc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff before the retry following failed `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Sending side of the mirroring queue. Cloning shares the same worker.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    tx: Option<mpsc::UnboundedSender<MirrorOp>>,
}

impl Mirror {
    /// A mirror that drops every operation.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spawns the worker applying operations to `gateway`. Must be called
    /// inside a tokio runtime.
    pub fn spawn(gateway: Arc<dyn PersistenceGateway>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mirror(rx, gateway, policy));
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn send(&self, op: MirrorOp) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(op) {
                error!("Failed to queue document update: {}", e);
            }
        }
    }

    pub fn save_game(&self, snapshot: &GameSnapshot) {
        if self.is_enabled() {
            self.send(MirrorOp::UpsertGame(GameDocument::from(snapshot)));
        }
    }
}

async fn run_mirror(
    mut rx: mpsc::UnboundedReceiver<MirrorOp>,
    gateway: Arc<dyn PersistenceGateway>,
    policy: RetryPolicy,
) {
    while let Some(op) = rx.recv().await {
        let attempts = policy.attempts.max(1);

        for attempt in 1..=attempts {
            match op.apply(gateway.as_ref()) {
                Ok(()) => {
                    debug!("Mirrored {}", op_label(&op));
                    break;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Mirroring {} failed (attempt {}/{}): {}",
                        op_label(&op),
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
                Err(e) => {
                    error!("Giving up mirroring {}: {}", op_label(&op), e);
                }
            }
        }
    }
    debug!("Mirror worker stopped");
}

fn op_label(op: &MirrorOp) -> String {
    match op {
        MirrorOp::UpsertGame(doc) => format!("game {}", doc.id),
        MirrorOp::DeleteGame(id) => format!("delete game {}", id),
        MirrorOp::UpsertUser(doc) => format!("user {}", doc.id),
    }
}

/// In-process gateway keeping bincode-encoded documents.
#[derive(Debug, Default)]
pub struct MemoryStore {
    games: Mutex<HashMap<GameId, Vec<u8>>>,
    users: Mutex<HashMap<UserId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self, id: GameId) -> Option<GameDocument> {
        let games = self.games.lock().unwrap_or_else(|e| e.into_inner());
        games.get(&id).and_then(|bytes| deserialize(bytes).ok())
    }

    pub fn user(&self, id: UserId) -> Option<UserDocument> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.get(&id).and_then(|bytes| deserialize(bytes).ok())
    }

    pub fn game_count(&self) -> usize {
        self.games.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl PersistenceGateway for MemoryStore {
    fn upsert_game(&self, doc: &GameDocument) -> Result<(), PersistenceError> {
        let bytes = serialize(doc)?;
        self.games
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(doc.id, bytes);
        Ok(())
    }

    fn delete_game(&self, id: GameId) -> Result<(), PersistenceError> {
        self.games
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }

    fn upsert_user(&self, doc: &UserDocument) -> Result<(), PersistenceError> {
        let bytes = serialize(doc)?;
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(doc.id, bytes);
        Ok(())
    }
}
