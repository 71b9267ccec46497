//! Session registry: creation, lookup and retirement of running games.
//!
//! The registry owns the table of live sessions and the user directory.
//! Sessions that end on a tick announce themselves on a retirement channel;
//! a background reaper removes them from the table and releases their tick
//! task. Sessions abandoned by their last player are removed before the
//! leave call returns.

use crate::config::{ConfigError, EngineConfig};
use crate::game::GameState;
use crate::notifications::Subscription;
use crate::persistence::{Mirror, PersistenceGateway, RetryPolicy};
use crate::session::GameSession;
use crate::users::UserDirectory;
use crate::utils::get_timestamp;
use log::{debug, info};
use shared::{GameError, GameId, GameResult, GameSnapshot, JoinTarget, LatLon, RegionChange, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};

struct SessionTable {
    sessions: HashMap<GameId, Arc<GameSession>>,
    next_game_id: GameId,
}

pub struct SessionRegistry {
    config: EngineConfig,
    users: UserDirectory,
    table: Arc<RwLock<SessionTable>>,
    mirror: Mirror,
    retire_tx: mpsc::UnboundedSender<GameId>,
}

impl SessionRegistry {
    /// Registry without persistence. Must be called inside a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, Mirror::disabled()))
    }

    /// Registry mirroring users and games into `gateway`.
    pub fn with_persistence(
        config: EngineConfig,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = RetryPolicy {
            attempts: config.persistence_retries,
            backoff: config.persistence_backoff(),
        };
        let mirror = Mirror::spawn(gateway, policy);
        Ok(Self::build(config, mirror))
    }

    fn build(config: EngineConfig, mirror: Mirror) -> Self {
        let table = Arc::new(RwLock::new(SessionTable {
            sessions: HashMap::new(),
            next_game_id: 1,
        }));
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        tokio::spawn(reap(Arc::downgrade(&table), retire_rx));

        Self {
            config,
            users: UserDirectory::new(mirror.clone()),
            table,
            mirror,
            retire_tx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Creates and activates a session with `creator` as its first player and
    /// the capital region centred on the creator's position.
    pub async fn create(
        &self,
        name: &str,
        creator: UserId,
        lat: f64,
        lon: f64,
    ) -> GameResult<Arc<GameSession>> {
        let position = LatLon::new(lat, lon)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::Validation("game name must not be empty".into()));
        }
        self.users.find(creator).await?;

        let mut table = self.table.write().await;
        if table.sessions.len() >= self.config.max_sessions {
            return Err(GameError::Full(self.config.max_sessions));
        }

        let id = table.next_game_id;
        table.next_game_id += 1;

        let state = GameState::new(id, name, creator, position, &self.config, get_timestamp());
        let session = Arc::new(GameSession::new(state, &self.config, self.mirror.clone()));
        session.activate(self.retire_tx.clone()).await?;
        table.sessions.insert(id, Arc::clone(&session));

        info!("Game {} ({}) created by user {}", id, name, creator);
        Ok(session)
    }

    pub async fn find(&self, id: GameId) -> GameResult<Arc<GameSession>> {
        self.table
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or(GameError::GameNotFound(id))
    }

    /// Lowest-id session that `username` is playing in.
    async fn find_by_member(&self, username: &str) -> GameResult<Arc<GameSession>> {
        let member = self.users.find_by_username(username).await?;

        let mut sessions: Vec<_> = self.table.read().await.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.id());

        for session in sessions {
            if session.has_player(member.id).await {
                return Ok(session);
            }
        }
        Err(GameError::MemberNotInGame(username.to_string()))
    }

    pub async fn join(
        &self,
        target: JoinTarget,
        user: UserId,
        position: Option<LatLon>,
    ) -> GameResult<GameSnapshot> {
        self.users.find(user).await?;
        let session = match target {
            JoinTarget::Game(id) => self.find(id).await?,
            JoinTarget::Member(username) => self.find_by_member(&username).await?,
        };
        session.join(user, position).await
    }

    pub async fn leave(&self, id: GameId, user: UserId) -> GameResult<GameSnapshot> {
        let session = self.find(id).await?;
        let (snapshot, ended) = session.leave(user).await?;
        if ended {
            self.retire(id).await;
        }
        Ok(snapshot)
    }

    pub async fn get(&self, id: GameId) -> GameResult<GameSnapshot> {
        Ok(self.find(id).await?.snapshot().await)
    }

    pub async fn set_geolocation(
        &self,
        id: GameId,
        user: UserId,
        lon: f64,
        lat: f64,
    ) -> GameResult<GameSnapshot> {
        self.find(id).await?.set_geolocation(user, lon, lat).await
    }

    pub async fn transfer_troops_to_base(
        &self,
        id: GameId,
        user: UserId,
        region: usize,
        amount: i64,
    ) -> GameResult<GameSnapshot> {
        self.find(id)
            .await?
            .transfer_troops_to_base(user, region, amount)
            .await
    }

    pub async fn listen_for_region_change<F>(&self, id: GameId, callback: F) -> GameResult<Subscription>
    where
        F: FnMut(RegionChange) + Send + 'static,
    {
        Ok(self.find(id).await?.listen_for_region_change(callback))
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<GameId> {
        let mut ids: Vec<_> = self.table.read().await.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn retire(&self, id: GameId) {
        retire_from(&self.table, id).await;
    }
}

async fn retire_from(table: &RwLock<SessionTable>, id: GameId) {
    let removed = table.write().await.sessions.remove(&id);
    if let Some(session) = removed {
        session.stop_ticker();
        info!("Game {} retired", id);
    }
}

async fn reap(table: Weak<RwLock<SessionTable>>, mut retired: mpsc::UnboundedReceiver<GameId>) {
    while let Some(id) = retired.recv().await {
        let Some(table) = table.upgrade() else {
            break;
        };
        retire_from(&table, id).await;
    }
    debug!("Session reaper stopped");
}
