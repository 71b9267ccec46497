//! Capturable regions of one session.

use crate::config::EngineConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{LatLon, RegionType, RegionView, UserId, EARTH_RADIUS_M, MAX_COORDINATE};
use std::f64::consts::TAU;

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub index: usize,
    pub center: LatLon,
    pub radius_m: f64,
    pub region_type: RegionType,
    pub owner: Option<UserId>,
    pub garrison: u32,
}

impl Region {
    pub fn contains(&self, position: &LatLon) -> bool {
        self.center.distance_m(position) <= self.radius_m
    }

    pub fn view(&self) -> RegionView {
        RegionView {
            index: self.index,
            lat: self.center.lat,
            lon: self.center.lon,
            radius: self.radius_m,
            region_type: self.region_type,
            owner: self.owner,
            garrison: self.garrison,
        }
    }
}

/// Ordered set of regions; a region's index is its position.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map for a new session: one capital centred on `capital`
    /// plus `extra_regions` outposts scattered around it.
    pub fn seeded(capital: LatLon, config: &EngineConfig) -> Self {
        let mut rng = match config.region_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::seeded_with(capital, config, &mut rng)
    }

    pub fn seeded_with<R: Rng>(capital: LatLon, config: &EngineConfig, rng: &mut R) -> Self {
        let mut map = Self::new();
        let radius = config.capture_radius_m;
        map.push(capital, radius, RegionType::Capital);

        // Outposts never overlap the capital
        let min_distance = radius * 2.0;
        let max_distance = config.region_spread_m.max(min_distance);

        for _ in 0..config.extra_regions {
            let distance = rng.gen_range(min_distance..=max_distance);
            let bearing = rng.gen_range(0.0..TAU);
            map.push(offset(capital, distance, bearing), radius, RegionType::Outpost);
        }

        map
    }

    pub fn push(&mut self, center: LatLon, radius_m: f64, region_type: RegionType) -> usize {
        let index = self.regions.len();
        self.regions.push(Region {
            index,
            center,
            radius_m,
            region_type,
            owner: None,
            garrison: 0,
        });
        index
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Region> {
        self.regions.iter_mut()
    }

    pub fn owned_by(&self, user: UserId) -> usize {
        self.regions
            .iter()
            .filter(|region| region.owner == Some(user))
            .count()
    }

    /// Clears ownership of every region held by `user`, keeping garrisons.
    /// Returns the indices that changed.
    pub fn release(&mut self, user: UserId) -> Vec<usize> {
        self.regions
            .iter_mut()
            .filter(|region| region.owner == Some(user))
            .map(|region| {
                region.owner = None;
                region.index
            })
            .collect()
    }

    pub fn total_garrison(&self) -> u64 {
        self.regions.iter().map(|r| r.garrison as u64).sum()
    }

    pub fn views(&self) -> Vec<RegionView> {
        self.regions.iter().map(Region::view).collect()
    }
}

/// Point `distance_m` away from `origin` along `bearing` (radians from north),
/// using a local flat-earth approximation.
fn offset(origin: LatLon, distance_m: f64, bearing: f64) -> LatLon {
    let d_lat = (distance_m * bearing.cos() / EARTH_RADIUS_M).to_degrees();
    let cos_lat = origin.lat.to_radians().cos();
    let cos_lat = if cos_lat.abs() < 1e-6 { 1e-6 } else { cos_lat };
    let d_lon = (distance_m * bearing.sin() / (EARTH_RADIUS_M * cos_lat)).to_degrees();

    LatLon {
        lat: (origin.lat + d_lat).clamp(-MAX_COORDINATE, MAX_COORDINATE),
        lon: (origin.lon + d_lon).clamp(-MAX_COORDINATE, MAX_COORDINATE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn capital() -> LatLon {
        LatLon::new(50.0, 10.0).unwrap()
    }

    fn config_with_outposts(count: usize) -> EngineConfig {
        EngineConfig {
            extra_regions: count,
            region_seed: Some(7),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_default_map_has_single_capital() {
        let map = RegionMap::seeded(capital(), &EngineConfig::default());

        assert_eq!(map.len(), 1);
        let region = map.get(0).unwrap();
        assert_eq!(region.center, capital());
        assert_eq!(region.region_type, RegionType::Capital);
        assert_eq!(region.owner, None);
        assert_eq!(region.garrison, 0);
        assert_eq!(region.radius_m, 50.0);
    }

    #[test]
    fn test_outposts_scattered_within_band() {
        let config = config_with_outposts(12);
        let map = RegionMap::seeded(capital(), &config);

        assert_eq!(map.len(), 13);
        for region in map.iter().skip(1) {
            assert_eq!(region.region_type, RegionType::Outpost);
            let distance = capital().distance_m(&region.center);
            assert!(distance >= 99.0, "outpost too close: {}", distance);
            assert!(distance <= 501.0, "outpost too far: {}", distance);
        }
    }

    #[test]
    fn test_same_seed_same_layout() {
        let config = config_with_outposts(5);
        let a = RegionMap::seeded(capital(), &config);
        let b = RegionMap::seeded(capital(), &config);
        assert_eq!(a.views(), b.views());
    }

    #[test]
    fn test_contains_uses_radius() {
        let map = RegionMap::seeded(capital(), &EngineConfig::default());
        let region = map.get(0).unwrap();

        assert!(region.contains(&capital()));
        let near = offset(capital(), 40.0, 0.0);
        let far = offset(capital(), 60.0, 0.0);
        assert!(region.contains(&near));
        assert!(!region.contains(&far));
    }

    #[test]
    fn test_offset_matches_great_circle_distance() {
        for bearing in [0.0, 1.0, 2.5, 4.0] {
            let moved = offset(capital(), 250.0, bearing);
            assert_approx_eq!(capital().distance_m(&moved), 250.0, 1.0);
        }
    }

    #[test]
    fn test_release_clears_owner_keeps_garrison() {
        let mut map = RegionMap::seeded(capital(), &config_with_outposts(2));
        for index in [0, 2] {
            let region = map.get_mut(index).unwrap();
            region.owner = Some(4);
            region.garrison = 3;
        }
        map.get_mut(1).unwrap().owner = Some(5);

        assert_eq!(map.owned_by(4), 2);
        assert_eq!(map.release(4), vec![0, 2]);
        assert_eq!(map.owned_by(4), 0);
        assert_eq!(map.owned_by(5), 1);
        assert_eq!(map.get(0).unwrap().garrison, 3);
        assert_eq!(map.total_garrison(), 6);
    }

    #[test]
    fn test_views_carry_every_attribute() {
        let mut map = RegionMap::seeded(capital(), &EngineConfig::default());
        map.get_mut(0).unwrap().owner = Some(1);

        let view = &map.views()[0];
        assert_eq!(view.index, 0);
        assert_eq!(view.lat, 50.0);
        assert_eq!(view.lon, 10.0);
        assert_eq!(view.owner, Some(1));
        assert_eq!(view.region_type, RegionType::Capital);
    }
}
