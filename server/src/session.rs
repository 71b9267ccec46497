//! A running game: state behind a single-writer lock, its notification
//! queue, its tick task and its document mirror.
//!
//! Every mutation takes the write lock for its whole duration, including
//! publishing the resulting events and queueing the mirrored document. Events
//! therefore reach subscribers in the same order the mutations were applied.

use crate::config::EngineConfig;
use crate::game::{GameState, TickReport};
use crate::notifications::{NotificationBus, Subscription};
use crate::persistence::{Mirror, MirrorOp};
use crate::ticker::Ticker;
use crate::utils::get_timestamp;
use log::{debug, info};
use shared::{
    GameId, GameResult, GameSnapshot, GameStatus, LatLon, RegionChange, SessionEvent, UserId,
};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

pub struct GameSession {
    id: GameId,
    name: String,
    tick_interval: Duration,
    state: RwLock<GameState>,
    bus: NotificationBus,
    ticker: Ticker,
    mirror: Mirror,
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl GameSession {
    pub fn new(state: GameState, config: &EngineConfig, mirror: Mirror) -> Self {
        let id = state.id();
        Self {
            id,
            name: state.name().to_string(),
            tick_interval: config.tick_interval(),
            state: RwLock::new(state),
            bus: NotificationBus::new(id, config.event_queue_capacity),
            ticker: Ticker::new(),
            mirror,
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn status(&self) -> GameStatus {
        self.state.read().await.status()
    }

    pub async fn has_player(&self, user: UserId) -> bool {
        self.state.read().await.has_player(user)
    }

    /// Opens the session for play and starts its tick task. Once the session
    /// ends on a tick, its id is sent on `retire`.
    ///
    /// The tick task only holds a weak reference, so dropping every
    /// `Arc<GameSession>` also stops it.
    pub async fn activate(self: &Arc<Self>, retire: mpsc::UnboundedSender<GameId>) -> GameResult<()> {
        {
            let mut state = self.state.write().await;
            state.activate()?;
            self.mirror.save_game(&state.snapshot());
        }

        let session = Arc::downgrade(self);
        let id = self.id;
        self.ticker.start(self.tick_interval, move || {
            let session = session.clone();
            let retire = retire.clone();
            async move {
                let Some(session) = session.upgrade() else {
                    return ControlFlow::Break(());
                };
                match session.tick().await {
                    Some(TickReport {
                        resolution: None, ..
                    }) => ControlFlow::Continue(()),
                    Some(_) => {
                        let _ = retire.send(id);
                        ControlFlow::Break(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
        debug!("Game {} ticking every {:?}", self.id, self.tick_interval);
        Ok(())
    }

    pub async fn join(&self, user: UserId, position: Option<LatLon>) -> GameResult<GameSnapshot> {
        let mut state = self.state.write().await;
        state.add_player(user, position, get_timestamp())?;

        let snapshot = state.snapshot();
        self.mirror.save_game(&snapshot);
        Ok(snapshot)
    }

    /// Removes `user`. The returned flag is set when this was the last player
    /// and the session has ended.
    pub async fn leave(&self, user: UserId) -> GameResult<(GameSnapshot, bool)> {
        let mut state = self.state.write().await;
        let report = state.remove_player(user)?;

        if !report.released.is_empty() {
            self.bus
                .publish(SessionEvent::RegionChange(state.region_change(Vec::new())));
        }

        let snapshot = state.snapshot();
        if report.ended {
            if let Some(event) = state.end_event() {
                self.bus.publish(event);
            }
            self.ticker.stop();
            self.mirror.send(MirrorOp::DeleteGame(self.id));
        } else {
            self.mirror.save_game(&snapshot);
        }
        Ok((snapshot, report.ended))
    }

    /// Records the position and applies any captures before returning.
    pub async fn set_geolocation(&self, user: UserId, lon: f64, lat: f64) -> GameResult<GameSnapshot> {
        let position = LatLon::new(lat, lon)?;

        let mut state = self.state.write().await;
        let captures = state.set_geolocation(user, position, get_timestamp())?;
        if !captures.is_empty() {
            self.bus
                .publish(SessionEvent::RegionChange(state.region_change(captures)));
        }

        let snapshot = state.snapshot();
        self.mirror.save_game(&snapshot);
        Ok(snapshot)
    }

    pub async fn transfer_troops_to_base(
        &self,
        user: UserId,
        region: usize,
        amount: i64,
    ) -> GameResult<GameSnapshot> {
        let mut state = self.state.write().await;
        let transfer = state.transfer(user, region, amount)?;
        if transfer.moved != 0 {
            self.bus
                .publish(SessionEvent::RegionChange(state.region_change(Vec::new())));
        }
        if transfer.was_clamped() {
            debug!(
                "Transfer of {} on game {} region {} clamped to {}",
                transfer.requested, self.id, region, transfer.moved
            );
        }

        let snapshot = state.snapshot();
        self.mirror.save_game(&snapshot);
        Ok(snapshot)
    }

    /// Runs one tick. Returns `None` once the session is no longer active.
    pub async fn tick(&self) -> Option<TickReport> {
        let mut state = self.state.write().await;
        let report = state.advance_tick()?;

        if report.regions_grown > 0 {
            self.bus
                .publish(SessionEvent::RegionChange(state.region_change(Vec::new())));
        }

        if report.resolution.is_some() {
            if let Some(event) = state.end_event() {
                self.bus.publish(event);
            }
            self.mirror.save_game(&state.snapshot());
            info!("Game {} finished after {} ticks", self.id, report.tick);
        }
        Some(report)
    }

    pub fn listen_for_region_change<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(RegionChange) + Send + 'static,
    {
        self.bus.listen_for_region_change(callback)
    }

    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        self.bus.listen(callback)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn stop_ticker(&self) -> bool {
        self.ticker.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, RetryPolicy};
    use shared::{EndReason, GameError};
    use std::sync::Mutex;

    const JAMES: UserId = 1;
    const JOHN: UserId = 2;

    fn config() -> EngineConfig {
        EngineConfig {
            tick_interval_ms: 1_000,
            win_score: 1_000,
            max_duration_secs: 3_600,
            ..EngineConfig::default()
        }
    }

    fn session(config: &EngineConfig, mirror: Mirror) -> Arc<GameSession> {
        let origin = LatLon::new(10.0, 10.0).unwrap();
        let state = GameState::new(1, "room1", JAMES, origin, config, 0);
        Arc::new(GameSession::new(state, config, mirror))
    }

    async fn active(config: &EngineConfig) -> (Arc<GameSession>, mpsc::UnboundedReceiver<GameId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session(config, Mirror::disabled());
        session.activate(tx).await.unwrap();
        (session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_is_visible_on_return() {
        let (session, _rx) = active(&config()).await;
        session.join(JOHN, None).await.unwrap();

        let snapshot = session.set_geolocation(JOHN, 10.0, 10.0).await.unwrap();
        assert_eq!(snapshot.regions[0].owner, Some(JOHN));
        assert_eq!(session.snapshot().await.regions[0].owner, Some(JOHN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_position_changes_nothing() {
        let (session, _rx) = active(&config()).await;
        let before = session.snapshot().await;

        let err = session.set_geolocation(JAMES, f64::NAN, 0.0).await.unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
        assert_eq!(session.snapshot().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_run_on_schedule() {
        let (session, _rx) = active(&config()).await;
        session.set_geolocation(JAMES, 10.0, 10.0).await.unwrap();
        let garrison = session.snapshot().await.regions[0].garrison;

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.tick, 3);
        assert_eq!(snapshot.regions[0].garrison, garrison + 3);
        assert!(session.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_arrive_in_mutation_order() {
        let (session, _rx) = active(&config()).await;
        session.join(JOHN, None).await.unwrap();

        let owners = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&owners);
        let _subscription = session.listen_for_region_change(move |change| {
            if !change.captures.is_empty() {
                seen.lock().unwrap().push(change.regions[0].owner);
            }
        });

        session.set_geolocation(JOHN, 10.0, 10.0).await.unwrap();
        session.set_geolocation(JAMES, 10.0, 10.0).await.unwrap();
        session.set_geolocation(JOHN, 10.0, 10.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*owners.lock().unwrap(), vec![Some(JOHN), Some(JAMES), Some(JOHN)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_win_retires_and_stops() {
        let config = EngineConfig {
            win_score: 2,
            ..config()
        };
        let (session, mut retired) = active(&config).await;
        let mut events = session.subscribe();
        session.set_geolocation(JAMES, 10.0, 10.0).await.unwrap();

        assert_eq!(retired.recv().await, Some(1));
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.status, GameStatus::Ended);
        assert_eq!(snapshot.winner, Some(JAMES));
        assert_eq!(snapshot.end_reason, Some(EndReason::Threshold));

        let mut ended = None;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Ended { winner, reason, .. } = event {
                ended = Some((winner, reason));
            }
        }
        assert_eq!(ended, Some((Some(JAMES), EndReason::Threshold)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.snapshot().await.tick, snapshot.tick);
        assert!(matches!(
            session.join(JOHN, None).await,
            Err(GameError::Closed(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_leave_ends_and_deletes_document() {
        let store = Arc::new(MemoryStore::new());
        let mirror = Mirror::spawn(
            store.clone(),
            RetryPolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = session(&config(), mirror);
        session.activate(tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.game(1).is_some());

        let (snapshot, ended) = session.leave(JAMES).await.unwrap();
        assert!(ended);
        assert_eq!(snapshot.end_reason, Some(EndReason::Abandoned));
        assert!(!session.is_ticking());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.game(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listening_after_end_reports_the_end() {
        let (session, _rx) = active(&config()).await;
        session.leave(JAMES).await.unwrap();

        let (tx, mut events) = mpsc::unbounded_channel();
        let subscription = session.listen(move |event| {
            let _ = tx.send(event);
        });

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Ended {
                winner: None,
                reason: EndReason::Abandoned,
                ..
            })
        ));
        assert_eq!(events.recv().await, None);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!subscription.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_stops_ticking() {
        let (session, _rx) = active(&config()).await;
        let weak = Arc::downgrade(&session);
        drop(session);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(weak.upgrade().is_none());
    }
}
