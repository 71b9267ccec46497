//! Per-session publish/subscribe of region changes.
//!
//! Each session owns one bounded broadcast queue. Publishing never blocks the
//! mutation or tick path. Every subscriber is served by its own task that
//! invokes the callback in FIFO order. A subscriber that falls more than the
//! queue capacity behind loses the oldest events (drop-oldest) and keeps
//! receiving from the oldest event still buffered; the loss is logged.
//! Subscribing after the session ended delivers only the final `Ended` event.

use log::{debug, warn};
use shared::{GameId, RegionChange, SessionEvent};
use std::sync::OnceLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub struct NotificationBus {
    game: GameId,
    sender: broadcast::Sender<SessionEvent>,
    ended: OnceLock<SessionEvent>,
}

impl NotificationBus {
    pub fn new(game: GameId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            game,
            sender,
            ended: OnceLock::new(),
        }
    }

    /// Queues an event for every current subscriber. Returns how many
    /// subscribers will see it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        // Recorded before sending so a concurrent listen sees one or the other
        if matches!(event, SessionEvent::Ended { .. }) {
            let _ = self.ended.set(event.clone());
        }
        self.sender.send(event).unwrap_or(0)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get().is_some()
    }

    /// Raw receiver, for consumers that drive delivery themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Invokes `callback` for every session event, including the final
    /// `Ended`, after which delivery stops. Must be called inside a tokio
    /// runtime.
    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        // Subscribe before spawning so nothing published after this call is missed
        let receiver = self.sender.subscribe();
        let handle = match self.ended.get() {
            Some(end) => tokio::spawn(deliver_end(self.game, end.clone(), callback)),
            None => tokio::spawn(deliver(self.game, receiver, callback)),
        };
        debug!("New subscriber on game {}", self.game);

        Subscription {
            game: self.game,
            handle: Some(handle),
        }
    }

    /// Invokes `callback` for region changes only.
    pub fn listen_for_region_change<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(RegionChange) + Send + 'static,
    {
        self.listen(move |event| {
            if let SessionEvent::RegionChange(change) = event {
                callback(change);
            }
        })
    }
}

async fn deliver<F>(game: GameId, mut receiver: broadcast::Receiver<SessionEvent>, mut callback: F)
where
    F: FnMut(SessionEvent),
{
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let ended = matches!(event, SessionEvent::Ended { .. });
                callback(event);
                if ended {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "Subscriber on game {} fell behind, dropped {} oldest events",
                    game, skipped
                );
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Subscriber on game {} finished", game);
}

async fn deliver_end<F>(game: GameId, end: SessionEvent, mut callback: F)
where
    F: FnMut(SessionEvent),
{
    callback(end);
    debug!("Late subscriber on game {} received the end", game);
}

/// Cancellation handle returned by the listen calls.
///
/// Dropping it detaches the listener, which then runs until the session ends
/// or is dropped. Call [`Subscription::cancel`] to stop delivery immediately.
#[derive(Debug)]
pub struct Subscription {
    game: GameId,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn game(&self) -> GameId {
        self.game
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Subscriber on game {} cancelled", self.game);
        }
    }
}
