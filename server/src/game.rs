use crate::capture::CaptureEvaluator;
use crate::config::EngineConfig;
use crate::economy::{Transfer, TroopEconomy};
use crate::region_map::RegionMap;
use crate::score::{Resolution, ScoreKeeper};
use log::info;
use shared::{
    CaptureEvent, EndReason, GameError, GameId, GameResult, GameSnapshot, GameStatus, Geolocation,
    LatLon, RegionChange, SessionEvent, UserId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: UserId,
    pub location: Option<Geolocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub regions_grown: usize,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveReport {
    /// Regions whose ownership was released
    pub released: Vec<usize>,
    pub ended: bool,
}

/// Complete state of one game. Every mutation goes through `&mut self`, so
/// the owner decides how writers are serialized.
#[derive(Debug, Clone)]
pub struct GameState {
    id: GameId,
    name: String,
    status: GameStatus,
    players: Vec<Player>,
    regions: RegionMap,
    economy: TroopEconomy,
    scores: ScoreKeeper,
    capture: CaptureEvaluator,
    tick: u64,
    created_at: u64,
    winner: Option<UserId>,
    end_reason: Option<EndReason>,
}

impl GameState {
    /// Creates an `Open` game with the capital centred on the creator.
    pub fn new(
        id: GameId,
        name: &str,
        creator: UserId,
        position: LatLon,
        config: &EngineConfig,
        now: u64,
    ) -> Self {
        let mut state = Self {
            id,
            name: name.to_string(),
            status: GameStatus::Open,
            players: Vec::new(),
            regions: RegionMap::seeded(position, config),
            economy: TroopEconomy::new(config.initial_troops),
            scores: ScoreKeeper::new(config.win_score, config.max_ticks()),
            capture: CaptureEvaluator::new(config.capture_seed_garrison),
            tick: 0,
            created_at: now,
            winner: None,
            end_reason: None,
        };
        state.enlist(creator, Some(Geolocation::new(position, now)));
        state
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn economy(&self) -> &TroopEconomy {
        &self.economy
    }

    pub fn scores(&self) -> &ScoreKeeper {
        &self.scores
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn has_player(&self, user: UserId) -> bool {
        self.players.iter().any(|p| p.id == user)
    }

    pub fn activate(&mut self) -> GameResult<()> {
        if self.status != GameStatus::Open {
            return Err(GameError::Closed(self.id));
        }
        self.status = GameStatus::Active;
        info!("Game {} ({}) is active", self.id, self.name);
        Ok(())
    }

    fn ensure_active(&self) -> GameResult<()> {
        if self.status == GameStatus::Active {
            Ok(())
        } else {
            Err(GameError::Closed(self.id))
        }
    }

    fn player_mut(&mut self, user: UserId) -> GameResult<&mut Player> {
        let game = self.id;
        self.players
            .iter_mut()
            .find(|p| p.id == user)
            .ok_or(GameError::PlayerNotInGame { user, game })
    }

    fn enlist(&mut self, user: UserId, location: Option<Geolocation>) {
        self.players.push(Player { id: user, location });
        self.economy.enlist(user);
        self.scores.enlist(user);
    }

    /// Adds a player. Joining twice only refreshes the stored position.
    /// Initial positions do not capture; only position updates do.
    pub fn add_player(&mut self, user: UserId, position: Option<LatLon>, now: u64) -> GameResult<()> {
        self.ensure_active()?;
        let location = position.map(|p| Geolocation::new(p, now));

        if let Ok(player) = self.player_mut(user) {
            if location.is_some() {
                player.location = location;
            }
            return Ok(());
        }

        self.enlist(user, location);
        info!("User {} joined game {}", user, self.id);
        Ok(())
    }

    /// Removes a player and releases their regions. The last player leaving
    /// ends the game without a winner.
    pub fn remove_player(&mut self, user: UserId) -> GameResult<LeaveReport> {
        self.ensure_active()?;
        self.player_mut(user)?;

        self.players.retain(|p| p.id != user);
        self.economy.discharge(user);
        self.scores.discharge(user);
        let released = self.regions.release(user);
        info!("User {} left game {}", user, self.id);

        let ended = self.players.is_empty();
        if ended {
            self.status = GameStatus::Ended;
            self.end_reason = Some(EndReason::Abandoned);
            info!("Game {} abandoned", self.id);
        }

        Ok(LeaveReport { released, ended })
    }

    /// Stores the new position and captures every region it falls inside.
    pub fn set_geolocation(
        &mut self,
        user: UserId,
        position: LatLon,
        now: u64,
    ) -> GameResult<Vec<CaptureEvent>> {
        self.ensure_active()?;
        self.player_mut(user)?.location = Some(Geolocation::new(position, now));

        let captures = self.capture.evaluate(&mut self.regions, user, &position, now);
        for capture in &captures {
            info!(
                "User {} captured region {} of game {} from {:?}",
                user, capture.region, self.id, capture.previous_owner
            );
        }
        Ok(captures)
    }

    pub fn transfer(&mut self, user: UserId, region: usize, amount: i64) -> GameResult<Transfer> {
        self.ensure_active()?;
        self.player_mut(user)?;
        self.economy.transfer(&mut self.regions, user, region, amount)
    }

    /// Runs one production/scoring step. Returns `None` when the game is not
    /// active.
    pub fn advance_tick(&mut self) -> Option<TickReport> {
        if self.status != GameStatus::Active {
            return None;
        }

        let regions_grown = self.economy.produce(&mut self.regions);
        self.scores.award(&self.regions);
        self.tick += 1;

        let resolution = self.scores.evaluate(self.tick);
        if let Some(resolution) = resolution {
            self.status = GameStatus::Ended;
            self.winner = Some(resolution.winner);
            self.end_reason = Some(resolution.reason);
            info!(
                "Game {} won by user {} ({:?}) on tick {}",
                self.id, resolution.winner, resolution.reason, self.tick
            );
        }

        Some(TickReport {
            tick: self.tick,
            regions_grown,
            resolution,
        })
    }

    pub fn region_change(&self, captures: Vec<CaptureEvent>) -> RegionChange {
        RegionChange {
            game: self.id,
            tick: self.tick,
            regions: self.regions.views(),
            troops: self.economy.pools().clone(),
            captures,
        }
    }

    /// The `Ended` event, once the game has ended.
    pub fn end_event(&self) -> Option<SessionEvent> {
        Some(SessionEvent::Ended {
            game: self.id,
            winner: self.winner,
            reason: self.end_reason?,
        })
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            users: self.players.iter().map(|p| p.id).collect(),
            geolocations: self.players.iter().map(|p| (p.id, p.location)).collect(),
            regions: self.regions.views(),
            troops: self.economy.pools().clone(),
            scores: self.scores.scores().clone(),
            tick: self.tick,
            created_at: self.created_at,
            winner: self.winner,
            end_reason: self.end_reason,
        }
    }
}
