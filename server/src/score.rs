//! Per-tick scoring and win conditions.

use crate::region_map::RegionMap;
use shared::{EndReason, UserId};
use std::collections::BTreeMap;

/// How a session was decided on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub winner: UserId,
    pub reason: EndReason,
}

#[derive(Debug, Clone)]
pub struct ScoreKeeper {
    scores: BTreeMap<UserId, u64>,
    win_score: u64,
    max_ticks: u64,
}

impl ScoreKeeper {
    pub fn new(win_score: u64, max_ticks: u64) -> Self {
        Self {
            scores: BTreeMap::new(),
            win_score,
            max_ticks,
        }
    }

    pub fn enlist(&mut self, user: UserId) {
        self.scores.entry(user).or_insert(0);
    }

    pub fn discharge(&mut self, user: UserId) -> Option<u64> {
        self.scores.remove(&user)
    }

    pub fn score(&self, user: UserId) -> Option<u64> {
        self.scores.get(&user).copied()
    }

    pub fn scores(&self) -> &BTreeMap<UserId, u64> {
        &self.scores
    }

    /// Adds each player's owned-region count to their score.
    pub fn award(&mut self, regions: &RegionMap) {
        for (user, score) in self.scores.iter_mut() {
            *score += regions.owned_by(*user) as u64;
        }
    }

    /// Highest score, ties going to the lowest user id.
    pub fn leader(&self) -> Option<(UserId, u64)> {
        self.scores
            .iter()
            .map(|(&user, &score)| (user, score))
            .fold(None, |best, (user, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((user, score)),
            })
    }

    /// Checks both win conditions after tick number `tick` has been scored.
    /// The threshold takes precedence over the timeout on the same tick.
    pub fn evaluate(&self, tick: u64) -> Option<Resolution> {
        let (leader, score) = self.leader()?;

        if score >= self.win_score {
            return Some(Resolution {
                winner: leader,
                reason: EndReason::Threshold,
            });
        }
        if tick >= self.max_ticks {
            return Some(Resolution {
                winner: leader,
                reason: EndReason::Timeout,
            });
        }
        None
    }
}
