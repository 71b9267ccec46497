//! Proximity captures.

use crate::region_map::RegionMap;
use shared::{CaptureEvent, LatLon, UserId};

/// Reassigns region ownership to a player standing inside the region.
///
/// Evaluation runs under the session's write lock, so concurrent position
/// updates are resolved in arrival order: whoever is evaluated first takes
/// the region, and a later player inside the same radius takes it from them.
#[derive(Debug, Clone, Copy)]
pub struct CaptureEvaluator {
    seed_garrison: u32,
}

impl CaptureEvaluator {
    pub fn new(seed_garrison: u32) -> Self {
        Self { seed_garrison }
    }

    pub fn evaluate(
        &self,
        regions: &mut RegionMap,
        user: UserId,
        position: &LatLon,
        timestamp: u64,
    ) -> Vec<CaptureEvent> {
        let mut captures = Vec::new();

        for region in regions.iter_mut() {
            if region.owner == Some(user) || !region.contains(position) {
                continue;
            }

            let previous_owner = region.owner.replace(user);
            if region.garrison == 0 {
                region.garrison = self.seed_garrison;
            }

            captures.push(CaptureEvent {
                region: region.index,
                previous_owner,
                new_owner: user,
                timestamp,
            });
        }

        captures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use shared::RegionType;

    const JAMES: UserId = 1;
    const JOHN: UserId = 2;

    fn two_regions() -> RegionMap {
        let mut map = RegionMap::new();
        map.push(LatLon::new(50.0, 10.0).unwrap(), 50.0, RegionType::Capital);
        map.push(LatLon::new(50.01, 10.0).unwrap(), 50.0, RegionType::Outpost);
        map
    }

    #[test]
    fn test_capture_seeds_empty_garrison() {
        let mut map = two_regions();
        let evaluator = CaptureEvaluator::new(EngineConfig::default().capture_seed_garrison);

        let captures = evaluator.evaluate(&mut map, JOHN, &LatLon::new(50.0, 10.0).unwrap(), 77);

        assert_eq!(
            captures,
            vec![CaptureEvent {
                region: 0,
                previous_owner: None,
                new_owner: JOHN,
                timestamp: 77,
            }]
        );
        assert_eq!(map.get(0).unwrap().owner, Some(JOHN));
        assert_eq!(map.get(0).unwrap().garrison, 1);
        assert_eq!(map.get(1).unwrap().owner, None);
    }

    #[test]
    fn test_owner_is_not_recaptured() {
        let mut map = two_regions();
        let evaluator = CaptureEvaluator::new(1);
        let spot = LatLon::new(50.0, 10.0).unwrap();

        assert_eq!(evaluator.evaluate(&mut map, JOHN, &spot, 1).len(), 1);
        assert!(evaluator.evaluate(&mut map, JOHN, &spot, 2).is_empty());
        assert_eq!(map.get(0).unwrap().garrison, 1);
    }

    #[test]
    fn test_capture_from_rival_keeps_garrison() {
        let mut map = two_regions();
        let evaluator = CaptureEvaluator::new(1);
        let spot = LatLon::new(50.0, 10.0).unwrap();

        evaluator.evaluate(&mut map, JAMES, &spot, 1);
        map.get_mut(0).unwrap().garrison = 6;

        let captures = evaluator.evaluate(&mut map, JOHN, &spot, 2);
        assert_eq!(captures[0].previous_owner, Some(JAMES));
        assert_eq!(map.get(0).unwrap().owner, Some(JOHN));
        assert_eq!(map.get(0).unwrap().garrison, 6);
    }

    #[test]
    fn test_outside_radius_captures_nothing() {
        let mut map = two_regions();
        let evaluator = CaptureEvaluator::new(1);

        // ~555m from both centres
        let captures = evaluator.evaluate(&mut map, JOHN, &LatLon::new(50.005, 10.0).unwrap(), 1);
        assert!(captures.is_empty());
        assert_eq!(map.owned_by(JOHN), 0);
    }
}
