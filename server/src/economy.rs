//! Troop production and pool/garrison transfers.
//!
//! Only [`TroopEconomy::produce`] creates troops. Transfers move troops
//! between a player's pool and a region garrison and clamp to whatever is
//! available instead of failing, so the pool + garrison total never changes.

use crate::region_map::RegionMap;
use shared::{GameError, GameResult, UserId};
use std::collections::BTreeMap;

/// Troops produced per owned region per tick.
pub const PRODUCTION_PER_TICK: u32 = 1;

/// Outcome of one transfer. `moved` is signed like the request: positive
/// means pool to garrison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub requested: i64,
    pub moved: i64,
}

impl Transfer {
    pub fn was_clamped(&self) -> bool {
        self.moved != self.requested
    }
}

#[derive(Debug, Clone)]
pub struct TroopEconomy {
    pools: BTreeMap<UserId, u32>,
    initial_troops: u32,
}

impl TroopEconomy {
    pub fn new(initial_troops: u32) -> Self {
        Self {
            pools: BTreeMap::new(),
            initial_troops,
        }
    }

    /// Gives a newly joined player the starting pool. Existing pools are kept.
    pub fn enlist(&mut self, user: UserId) {
        self.pools.entry(user).or_insert(self.initial_troops);
    }

    /// Drops a departing player's pool, returning what it held.
    pub fn discharge(&mut self, user: UserId) -> Option<u32> {
        self.pools.remove(&user)
    }

    pub fn pool(&self, user: UserId) -> Option<u32> {
        self.pools.get(&user).copied()
    }

    pub fn pools(&self) -> &BTreeMap<UserId, u32> {
        &self.pools
    }

    pub fn total_pooled(&self) -> u64 {
        self.pools.values().map(|&p| p as u64).sum()
    }

    /// Grows every owned garrison by [`PRODUCTION_PER_TICK`]. Returns how
    /// many regions grew.
    pub fn produce(&self, regions: &mut RegionMap) -> usize {
        let mut grown = 0;
        for region in regions.iter_mut().filter(|r| r.owner.is_some()) {
            region.garrison = region.garrison.saturating_add(PRODUCTION_PER_TICK);
            grown += 1;
        }
        grown
    }

    /// Moves troops between `user`'s pool and the garrison of a region they
    /// own. Positive `amount` reinforces the garrison, negative withdraws.
    pub fn transfer(
        &mut self,
        regions: &mut RegionMap,
        user: UserId,
        region_index: usize,
        amount: i64,
    ) -> GameResult<Transfer> {
        let pool = self
            .pools
            .get_mut(&user)
            .ok_or(GameError::UserNotFound(user))?;
        let region = regions
            .get_mut(region_index)
            .ok_or(GameError::RegionNotFound(region_index))?;

        if region.owner != Some(user) {
            return Err(GameError::Validation(format!(
                "region {} is not owned by user {}",
                region_index, user
            )));
        }

        let wanted = u32::try_from(amount.unsigned_abs()).unwrap_or(u32::MAX);
        let moved = if amount >= 0 {
            let moved = wanted.min(*pool).min(u32::MAX - region.garrison);
            *pool -= moved;
            region.garrison += moved;
            i64::from(moved)
        } else {
            let moved = wanted.min(region.garrison).min(u32::MAX - *pool);
            region.garrison -= moved;
            *pool += moved;
            -i64::from(moved)
        };

        Ok(Transfer {
            requested: amount,
            moved,
        })
    }
}
