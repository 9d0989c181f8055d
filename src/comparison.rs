use crate::config::SimulationConfig;
use crate::error::{NetworkError, SpawnError};
use crate::light::ControlMode;
use crate::math::Point2d;
use crate::metrics::PanelMetrics;
use crate::network::Network;
use crate::routing::{RoutingCache, VehicleGroupId};
use crate::simulation::{SpawnRequest, Simulation};
use crate::{LocationId, StreetId};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// The largest time step simulated at once, in s. Longer frames are clamped.
pub const MAX_STEP: f64 = 0.1;

/// Two panels running the same network and traffic side by side, one under
/// fixed-timer control and one under adaptive control.
///
/// Vehicles are spawned in twins, one per panel, which share a group ID and
/// therefore take the same routes.
pub struct Comparison {
    fixed: Simulation,
    adaptive: Simulation,
    cache: RoutingCache,
    next_group: u64,
    rng: StdRng,
}

/// The metrics of both panels at one moment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComparisonMetrics {
    pub fixed: PanelMetrics,
    pub adaptive: PanelMetrics,
}

impl Comparison {
    pub fn new(network: Network, config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            fixed: Simulation::new(network.clone(), ControlMode::FixedTimer, config.clone()),
            adaptive: Simulation::new(network, ControlMode::Adaptive, config),
            cache: RoutingCache::new(),
            next_group: 0,
            rng,
        }
    }

    /// Advances both panels by `dt` seconds, clamped to [`MAX_STEP`].
    pub fn step(&mut self, dt: f64) {
        let dt = dt.clamp(0.0, MAX_STEP);
        self.fixed.step(dt, &mut self.cache);
        self.adaptive.step(dt, &mut self.cache);
    }

    /// Loads a new network into both panels, discarding all vehicles and statistics.
    pub fn load_network(&mut self, network: Network) {
        self.fixed.replace_network(network.clone());
        self.adaptive.replace_network(network);
        self.cache.clear();
        log::info!("loaded a new network");
    }

    pub fn add_location(&mut self, name: &str, pos: Point2d) -> LocationId {
        let id = self.fixed.add_location(name, pos);
        let twin = self.adaptive.add_location(name, pos);
        debug_assert_eq!(id, twin);
        id
    }

    pub fn add_street(
        &mut self,
        name: &str,
        from: LocationId,
        to: LocationId,
        width: f64,
    ) -> Result<StreetId, NetworkError> {
        let id = self.fixed.add_street(name, from, to, width)?;
        let twin = self.adaptive.add_street(name, from, to, width)?;
        debug_assert_eq!(id, twin);
        Ok(id)
    }

    pub fn remove_street(&mut self, id: StreetId) -> Result<(), NetworkError> {
        self.fixed.remove_street(id)?;
        self.adaptive.remove_street(id)
    }

    pub fn remove_location(&mut self, id: LocationId) -> Result<(), NetworkError> {
        self.fixed.remove_location(id)?;
        self.adaptive.remove_location(id)
    }

    /// Spawns a pair of twin vehicles at a parking lot, heading for a random other parking lot.
    ///
    /// Twins are spawned in both panels or neither: if the parking lot's street is
    /// occupied in either panel, the spawn is rejected with [`SpawnError::Blocked`].
    pub fn spawn(&mut self, parking: LocationId) -> Result<VehicleGroupId, SpawnError> {
        let destination = self
            .fixed
            .network()
            .parking_lots()
            .filter(|id| *id != parking)
            .choose(&mut self.rng);
        let group = VehicleGroupId(self.next_group);
        let request = SpawnRequest {
            parking: Some(parking),
            destination,
            group,
            preferred_speed: Some(self.sample_preferred_speed()),
            ..Default::default()
        };
        self.fixed.can_spawn(&request)?;
        self.adaptive.can_spawn(&request)?;
        self.fixed.spawn_vehicle(&request)?;
        if let Err(err) = self.adaptive.spawn_vehicle(&request) {
            log::warn!("spawned {:?} in only one panel", group);
            return Err(err);
        }
        self.next_group += 1;
        Ok(group)
    }

    /// Spawns a pair of twin vehicles at a random parking lot.
    pub fn spawn_random(&mut self) -> Result<VehicleGroupId, SpawnError> {
        let parking = self
            .fixed
            .network()
            .parking_lots()
            .choose(&mut self.rng)
            .ok_or(SpawnError::MissingField("parking lot"))?;
        self.spawn(parking)
    }

    /// Samples a preferred speed around the configured one.
    fn sample_preferred_speed(&mut self) -> f64 {
        let params = &self.fixed.config().vehicles;
        let factor = match Normal::new(1.0, params.speed_stddev) {
            Ok(distr) => distr.sample(&mut self.rng).clamp(0.75, 1.25),
            Err(_) => 1.0,
        };
        params.preferred_speed * factor
    }

    /// The metrics of both panels.
    pub fn metrics(&self) -> ComparisonMetrics {
        ComparisonMetrics {
            fixed: self.fixed.metrics(),
            adaptive: self.adaptive.metrics(),
        }
    }

    /// Forgets the statistics of retired vehicles in both panels.
    pub fn reset_metrics(&mut self) {
        self.fixed.reset_metrics();
        self.adaptive.reset_metrics();
    }

    /// The fixed-timer panel.
    pub fn fixed(&self) -> &Simulation {
        &self.fixed
    }

    /// The adaptive panel.
    pub fn adaptive(&self) -> &Simulation {
        &self.adaptive
    }

    pub fn routing_cache(&self) -> &RoutingCache {
        &self.cache
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tee() -> Network {
        let mut net = Network::new();
        let centre = net.add_location("centre", Point2d::new(0.0, 0.0));
        for (x, y) in [(200.0, 0.0), (-200.0, 0.0), (0.0, -200.0)] {
            let end = net.add_location("end", Point2d::new(x, y));
            net.add_street("arm", end, centre, 20.0).unwrap();
        }
        net
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            seed: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn twins_share_group_and_speed() {
        let mut cmp = Comparison::new(tee(), config());
        let lots = cmp.fixed().network().parking_lots().collect::<Vec<_>>();
        for lot in &lots {
            cmp.spawn(*lot).unwrap();
        }
        let mut fixed = cmp.fixed().iter_vehicles().collect::<Vec<_>>();
        let mut adaptive = cmp.adaptive().iter_vehicles().collect::<Vec<_>>();
        fixed.sort_by_key(|v| v.group());
        adaptive.sort_by_key(|v| v.group());
        assert_eq!(fixed.len(), lots.len());
        for (f, a) in fixed.iter().zip(&adaptive) {
            assert_eq!(f.group(), a.group());
            assert_eq!(f.preferred_speed(), a.preferred_speed());
            assert_eq!(f.destination(), a.destination());
            assert_ne!(f.destination(), f.start_location());
            let base = cmp.fixed().config().vehicles.preferred_speed;
            assert!(f.preferred_speed() >= 0.75 * base && f.preferred_speed() <= 1.25 * base);
        }
    }

    #[test]
    fn twins_take_the_same_routes() {
        let mut cmp = Comparison::new(tee(), config());
        let mut spawned = 0;
        for frame in 0..1200 {
            if frame % 40 == 0 && spawned < 6 && cmp.spawn_random().is_ok() {
                spawned += 1;
            }
            cmp.step(0.1);
        }
        assert!(!cmp.routing_cache().is_empty());
        for f in cmp.fixed().iter_vehicles() {
            let Some(a) = cmp.adaptive().iter_vehicles().find(|a| a.group() == f.group()) else {
                continue;
            };
            // Paths may differ in length, but never in the streets taken
            let n = f.path().len().min(a.path().len());
            assert_eq!(f.path()[..n], a.path()[..n]);
        }
    }

    #[test]
    fn loading_a_network_starts_afresh() {
        let mut cmp = Comparison::new(tee(), config());
        cmp.spawn_random().unwrap();
        for _ in 0..100 {
            cmp.step(1.0);
        }
        assert!(cmp.fixed().time() <= 10.0 + 1e-9);

        cmp.load_network(tee());
        assert!(cmp.routing_cache().is_empty());
        assert_eq!(cmp.fixed().iter_vehicles().count(), 0);
        assert_eq!(cmp.metrics().fixed, PanelMetrics::default());
        assert_eq!(cmp.adaptive().iter_lights().count(), 3);
    }

    #[test]
    fn occupied_parking_lot_spawns_in_neither_panel() {
        let mut cmp = Comparison::new(tee(), config());
        let lot = cmp.fixed().network().parking_lots().next().unwrap();
        let first = cmp.spawn(lot).unwrap();
        assert!(matches!(cmp.spawn(lot), Err(SpawnError::Blocked { .. })));
        assert_eq!(cmp.fixed().iter_vehicles().count(), 1);
        assert_eq!(cmp.adaptive().iter_vehicles().count(), 1);

        for _ in 0..30 {
            cmp.step(0.1);
        }
        let second = cmp.spawn(lot).unwrap();
        assert_eq!(second.0, first.0 + 1);
        assert_eq!(cmp.adaptive().iter_vehicles().count(), 2);
    }
}
