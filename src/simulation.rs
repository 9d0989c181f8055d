use crate::config::SimulationConfig;
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::error::{NetworkError, SpawnError};
use crate::light::{ControlMode, Intersection, TrafficLight};
use crate::math::Point2d;
use crate::metrics::{PanelMetrics, StatsTotals};
use crate::network::{Direction, LocationKind, Network};
use crate::routing::{RoutingCache, VehicleGroupId};
use crate::vehicle::{Placement, Surroundings, Vehicle, ENTRY_OFFSET};
use crate::{LightSet, LocationId, StreetId, TrafficLightId, VehicleId, VehicleSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slotmap::SecondaryMap;

/// A request to place a new vehicle in a parking lot.
///
/// Missing fields are rejected, except the street and direction which are
/// inferred from the parking lot when absent.
#[derive(Clone, Debug, Default)]
pub struct SpawnRequest {
    pub parking: Option<LocationId>,
    pub destination: Option<LocationId>,
    pub street: Option<StreetId>,
    pub direction: Option<Direction>,
    pub group: VehicleGroupId,
    /// Defaults to the configured preferred speed.
    pub preferred_speed: Option<f64>,
}

/// One panel of the comparison: a road network with its own lights and vehicles,
/// under a single control mode.
pub struct Simulation {
    network: Network,
    config: SimulationConfig,
    mode: ControlMode,
    /// The traffic lights of every intersection.
    lights: LightSet,
    /// The signalised locations.
    intersections: SecondaryMap<LocationId, Intersection>,
    /// The vehicles being simulated.
    vehicles: VehicleSet,
    /// Statistics of vehicles which have been removed.
    retired: StatsTotals,
    /// Trips completed by vehicles which have been removed.
    retired_trips: u32,
    rng: StdRng,
    /// The simulated time in s.
    time: f64,
    /// The current frame of simulation.
    frame: usize,
    /// Debugging information from the previously simulated frame.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Simulation {
    /// Creates a new simulation of the given network.
    pub fn new(network: Network, mode: ControlMode, config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut sim = Self {
            network,
            config,
            mode,
            lights: Default::default(),
            intersections: Default::default(),
            vehicles: Default::default(),
            retired: Default::default(),
            retired_trips: 0,
            rng,
            time: 0.0,
            frame: 0,
            #[cfg(feature = "debug")]
            debug: Default::default(),
        };
        sim.sync_intersections();
        sim
    }

    /// Replaces the road network, discarding every vehicle and light.
    pub fn replace_network(&mut self, network: Network) {
        self.network = network;
        self.vehicles.clear();
        for intersection in self.intersections.values() {
            intersection.remove_lights(&mut self.lights);
        }
        self.intersections.clear();
        self.sync_intersections();
        self.reset_metrics();
    }

    /// Adds a location to the network.
    pub fn add_location(&mut self, name: &str, pos: Point2d) -> LocationId {
        self.network.add_location(name, pos)
    }

    /// Adds a street to the network, rebuilding the lights at both ends.
    pub fn add_street(
        &mut self,
        name: &str,
        from: LocationId,
        to: LocationId,
        width: f64,
    ) -> Result<StreetId, NetworkError> {
        let id = self.network.add_street(name, from, to, width)?;
        self.sync_intersections();
        Ok(id)
    }

    /// Removes a street from the network.
    /// Vehicles on the street are removed during the next step.
    pub fn remove_street(&mut self, id: StreetId) -> Result<(), NetworkError> {
        self.network.remove_street(id)?;
        self.sync_intersections();
        Ok(())
    }

    /// Removes a location and its streets from the network.
    pub fn remove_location(&mut self, id: LocationId) -> Result<(), NetworkError> {
        self.network.remove_location(id)?;
        self.sync_intersections();
        Ok(())
    }

    /// Builds lights at every location with more than two streets, rebuilding those
    /// whose streets have changed and removing those which are no longer needed.
    fn sync_intersections(&mut self) {
        let stale = self
            .intersections
            .iter()
            .filter(|(loc, intersection)| {
                self.network.location(*loc).is_none()
                    || !intersection.serves(&self.network.streets_at(*loc))
            })
            .map(|(loc, _)| loc)
            .collect::<Vec<_>>();
        for loc in stale {
            if let Some(intersection) = self.intersections.remove(loc) {
                intersection.remove_lights(&mut self.lights);
                log::debug!("removed lights at {:?}", loc);
            }
        }

        let unlit = self
            .network
            .iter_locations()
            .map(|l| l.id())
            .filter(|loc| self.network.kind(*loc).is_signalised())
            .filter(|loc| !self.intersections.contains_key(*loc))
            .collect::<Vec<_>>();
        for loc in unlit {
            if let Some(intersection) = Intersection::build(
                loc,
                &self.network,
                &mut self.lights,
                &self.config.lights,
                &mut self.rng,
            ) {
                self.intersections.insert(loc, intersection);
            }
        }
    }

    /// Places a new vehicle at the start of a parking lot's street.
    pub fn spawn_vehicle(&mut self, request: &SpawnRequest) -> Result<VehicleId, SpawnError> {
        let result = self.place(request).map(|place| {
            let params = &self.config.vehicles;
            let now = self.time;
            let network = &self.network;
            self.vehicles.insert_with_key(|id| {
                let mut vehicle = Vehicle::new(id, place, params, now);
                vehicle.update_coords(network);
                vehicle
            })
        });
        match &result {
            Err(err @ SpawnError::Blocked { .. }) => log::debug!("rejected spawn: {}", err),
            Err(err) => log::warn!("rejected spawn: {}", err),
            Ok(_) => {}
        }
        result
    }

    /// Checks whether a vehicle could be spawned, without spawning it.
    pub fn can_spawn(&self, request: &SpawnRequest) -> Result<(), SpawnError> {
        self.place(request).map(|_| ())
    }

    /// Validates a spawn request.
    fn place(&self, request: &SpawnRequest) -> Result<Placement, SpawnError> {
        let parking = request.parking.ok_or(SpawnError::MissingField("parking lot"))?;
        let destination = request
            .destination
            .ok_or(SpawnError::MissingField("destination"))?;
        for loc in [parking, destination] {
            if self.network.location(loc).is_none() {
                return Err(SpawnError::UnknownLocation(loc));
            }
        }
        if self.network.kind(parking) != LocationKind::Parking {
            return Err(SpawnError::NotParking(parking));
        }

        let street_id = match request.street {
            Some(id) => id,
            None => self.network.streets_at(parking)[0],
        };
        let street = self
            .network
            .street(street_id)
            .ok_or(SpawnError::UnknownStreet(street_id))?;
        if !street.touches(parking) {
            return Err(SpawnError::Disconnected {
                parking,
                street: street_id,
            });
        }
        let direction = street.direction_from(parking);
        if request.direction.map_or(false, |d| d != direction) {
            return Err(SpawnError::WrongDirection {
                parking,
                street: street_id,
            });
        }

        let length = self
            .network
            .street_length(street_id)
            .ok_or(SpawnError::UnknownStreet(street_id))?;
        let clearance = self.config.vehicles.length + self.config.vehicles.min_gap;
        let blocked = self
            .vehicles
            .values()
            .filter(|v| !v.has_reached_destination())
            .filter(|v| v.street() == street_id && v.direction() == direction)
            .any(|v| (v.progress() - ENTRY_OFFSET) * length < clearance);
        if blocked {
            return Err(SpawnError::Blocked {
                parking,
                street: street_id,
            });
        }

        Ok(Placement {
            group: request.group,
            parking,
            destination,
            street: street_id,
            direction,
            preferred_speed: request
                .preferred_speed
                .unwrap_or(self.config.vehicles.preferred_speed),
        })
    }

    /// Removes a vehicle, keeping its statistics.
    pub fn remove_vehicle(&mut self, id: VehicleId) {
        if let Some(mut vehicle) = self.vehicles.remove(id) {
            self.retire(&mut vehicle);
        }
    }

    /// Folds a vehicle's statistics into the retired totals, once.
    fn retire(&mut self, vehicle: &mut Vehicle) {
        if vehicle.take_count() {
            self.retired.add(&vehicle.stats());
            self.retired_trips += vehicle.trips_completed();
        }
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// `cache` pins routing decisions so that twin vehicles in another panel follow
    /// the same routes.
    pub fn step(&mut self, dt: f64, cache: &mut RoutingCache) {
        self.update_lights(dt);
        self.apply_driving_rules(cache);
        self.integrate(dt, cache);
        self.remove_finished_vehicles();
        self.frame += 1;

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }
    }

    /// Updates every intersection's lights, then checks them for safety.
    fn update_lights(&mut self, dt: f64) {
        let config = &self.config;
        for intersection in self.intersections.values_mut() {
            match self.mode {
                ControlMode::FixedTimer => {
                    intersection.step_fixed(&mut self.lights, dt, &config.lights);
                }
                ControlMode::Adaptive => {
                    let due = intersection.step_adaptive(
                        &mut self.lights,
                        dt,
                        &config.lights,
                        config.adaptive.evaluation_interval,
                    );
                    if due || intersection.is_stalled(&self.lights, &config.adaptive) {
                        let decision = intersection.evaluate(
                            &self.network,
                            &self.lights,
                            &self.vehicles,
                            &config.adaptive,
                            &config.vehicles,
                        );
                        intersection.apply(decision, &mut self.lights);
                    }
                }
            }
            intersection.validate(&mut self.lights, dt, &config.lights);
        }
    }

    /// Calculates the target speed of every vehicle.
    fn apply_driving_rules(&mut self, cache: &mut RoutingCache) {
        let params = &self.config.vehicles;
        for vehicle in self.vehicles.values_mut() {
            vehicle.validate(&self.network);
            vehicle.plan_route(&self.network, cache, &mut self.rng);
        }

        let jitter = self
            .vehicles
            .keys()
            .map(|id| {
                let jitter = if params.deadlock_jitter > 0.0 {
                    self.rng.gen_range(0.0..params.deadlock_jitter)
                } else {
                    0.0
                };
                (id, jitter)
            })
            .collect::<SecondaryMap<_, _>>();

        let surroundings = Surroundings::new(
            &self.network,
            &self.lights,
            &self.intersections,
            &self.vehicles,
            params,
        );
        for vehicle in self.vehicles.values() {
            vehicle.reset();
            surroundings.apply_rules(vehicle);
        }
        surroundings.yield_to_cross_traffic();
        surroundings.resolve_deadlocks(self.time, &jitter);
    }

    /// Integrates the speeds and positions of all vehicles and moves them onto new streets.
    fn integrate(&mut self, dt: f64, cache: &mut RoutingCache) {
        let now = self.time + dt;
        let params = &self.config.vehicles;
        for vehicle in self.vehicles.values_mut() {
            vehicle.integrate(dt, now, &self.network, params);
            vehicle.advance(&self.network, now, cache, &mut self.rng, params);
            vehicle.update_coords(&self.network);
        }
        self.time = now;
    }

    /// Removes vehicles which are done, stuck or too old.
    fn remove_finished_vehicles(&mut self) {
        let now = self.time;
        let params = &self.config.vehicles;
        let finished = self
            .vehicles
            .values()
            .filter(|v| {
                v.has_reached_destination()
                    || v.stuck_for(now) > params.stuck_timeout
                    || now - v.created_at() > params.max_age
            })
            .map(|v| v.id())
            .collect::<Vec<_>>();
        for id in finished {
            log::debug!("removing {:?}", id);
            self.remove_vehicle(id);
        }
    }

    /// The panel's metrics over its active and retired vehicles.
    pub fn metrics(&self) -> PanelMetrics {
        let mut totals = self.retired;
        let mut trips = self.retired_trips;
        for vehicle in self.vehicles.values() {
            totals.add(&vehicle.stats());
            trips += vehicle.trips_completed();
        }
        PanelMetrics::from_totals(&totals, self.vehicles.len(), trips)
    }

    /// Forgets the statistics of retired vehicles.
    pub fn reset_metrics(&mut self) {
        self.retired = Default::default();
        self.retired_trips = 0;
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Gets the simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Returns an iterator over all the traffic lights in the simulation.
    pub fn iter_lights(&self) -> impl Iterator<Item = (TrafficLightId, &TrafficLight)> {
        self.lights.iter()
    }

    /// Returns an iterator over the signalised locations.
    pub fn iter_intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.values()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle_id)
    }

    pub fn get_light(&self, light_id: TrafficLightId) -> Option<&TrafficLight> {
        self.lights.get(light_id)
    }

    /// Gets the lights of a location, if it has any.
    pub fn intersection(&self, location: LocationId) -> Option<&Intersection> {
        self.intersections.get(location)
    }

    /// Gets the debugging information for the previously simulated frame as JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        self.debug.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::light::{Axis, Decision, LightState};

    struct Cross {
        net: Network,
        centre: LocationId,
        /// East, north, west, south
        ends: [LocationId; 4],
        streets: [StreetId; 4],
    }

    fn cross(arm: f64) -> Cross {
        let mut net = Network::new();
        let centre = net.add_location("centre", Point2d::new(0.0, 0.0));
        let mut ends = vec![];
        let mut streets = vec![];
        for (x, y) in [(arm, 0.0), (0.0, arm), (-arm, 0.0), (0.0, -arm)] {
            let end = net.add_location("end", Point2d::new(x, y));
            streets.push(net.add_street("arm", end, centre, 20.0).unwrap());
            ends.push(end);
        }
        Cross {
            net,
            centre,
            ends: ends.try_into().unwrap(),
            streets: streets.try_into().unwrap(),
        }
    }

    fn config() -> SimulationConfig {
        let mut config = SimulationConfig {
            seed: Some(7),
            ..Default::default()
        };
        config.lights.initial_jitter = 0.0;
        config
    }

    fn spawn(sim: &mut Simulation, from: LocationId, to: LocationId, group: u64) -> VehicleId {
        sim.spawn_vehicle(&SpawnRequest {
            parking: Some(from),
            destination: Some(to),
            group: VehicleGroupId(group),
            ..Default::default()
        })
        .unwrap()
    }

    fn group_of(sim: &Simulation, axis: Axis) -> usize {
        sim.intersection(sim_centre(sim))
            .unwrap()
            .groups()
            .iter()
            .position(|g| g.axis() == axis)
            .unwrap()
    }

    fn sim_centre(sim: &Simulation) -> LocationId {
        sim.iter_intersections().next().unwrap().location()
    }

    #[test]
    fn adaptive_controller_switches_to_waiting_traffic() {
        let cross = cross(300.0);
        let mut sim = Simulation::new(cross.net, ControlMode::FixedTimer, config());
        let mut cache = RoutingCache::new();
        let ns = group_of(&sim, Axis::NorthSouth);
        let ew = group_of(&sim, Axis::EastWest);

        // Five vehicles approach on the east-west streets while north-south is green
        for i in 0..5u64 {
            let (from, to) = if i % 2 == 0 {
                (cross.ends[0], cross.ends[2])
            } else {
                (cross.ends[2], cross.ends[0])
            };
            spawn(&mut sim, from, to, i);
            for _ in 0..10 {
                sim.step(0.1, &mut cache);
            }
        }
        assert!(sim.time() < sim.config().lights.green);

        let int = &sim.intersections[cross.centre];
        assert_eq!(int.groups()[ns].state(&sim.lights), LightState::Green);
        let decision = int.evaluate(
            &sim.network,
            &sim.lights,
            &sim.vehicles,
            &sim.config.adaptive,
            &sim.config.vehicles,
        );
        assert_eq!(decision, Decision::Switch(ew));
    }

    #[test]
    fn adaptive_lights_stay_green_without_traffic() {
        let cross = cross(300.0);
        let mut sim = Simulation::new(cross.net, ControlMode::Adaptive, config());
        let mut cache = RoutingCache::new();
        let ns = group_of(&sim, Axis::NorthSouth);
        for _ in 0..600 {
            sim.step(0.1, &mut cache);
        }
        let int = sim.intersection(cross.centre).unwrap();
        assert_eq!(int.groups()[ns].state(&sim.lights), LightState::Green);
    }

    #[test]
    fn lights_follow_structural_edits() {
        let cross = cross(100.0);
        let mut sim = Simulation::new(cross.net, ControlMode::FixedTimer, config());
        assert_eq!(sim.iter_lights().count(), 4);

        sim.remove_street(cross.streets[3]).unwrap();
        assert_eq!(sim.iter_lights().count(), 3);
        assert!(sim
            .iter_lights()
            .all(|(_, l)| l.street() != cross.streets[3]));

        sim.remove_street(cross.streets[1]).unwrap();
        assert!(sim.intersection(cross.centre).is_none());
        assert_eq!(sim.iter_lights().count(), 0);

        let end = sim.add_location("new", Point2d::new(0.0, 50.0));
        sim.add_street("new", end, cross.centre, 20.0).unwrap();
        assert_eq!(sim.iter_lights().count(), 3);
    }

    #[test]
    fn spawn_requests_are_validated() {
        let cross = cross(100.0);
        let mut sim = Simulation::new(cross.net, ControlMode::FixedTimer, config());
        let request = SpawnRequest {
            parking: Some(cross.ends[0]),
            destination: Some(cross.ends[2]),
            ..Default::default()
        };

        let missing = SpawnRequest {
            parking: None,
            ..request.clone()
        };
        assert_eq!(
            sim.spawn_vehicle(&missing),
            Err(SpawnError::MissingField("parking lot"))
        );

        let not_parking = SpawnRequest {
            parking: Some(cross.centre),
            ..request.clone()
        };
        assert_eq!(
            sim.spawn_vehicle(&not_parking),
            Err(SpawnError::NotParking(cross.centre))
        );

        let disconnected = SpawnRequest {
            street: Some(cross.streets[1]),
            ..request.clone()
        };
        assert!(matches!(
            sim.spawn_vehicle(&disconnected),
            Err(SpawnError::Disconnected { .. })
        ));

        let wrong_way = SpawnRequest {
            direction: Some(Direction::Backward),
            ..request.clone()
        };
        assert!(matches!(
            sim.spawn_vehicle(&wrong_way),
            Err(SpawnError::WrongDirection { .. })
        ));

        let id = sim.spawn_vehicle(&request).unwrap();
        let vehicle = sim.get_vehicle(id).unwrap();
        assert_eq!(vehicle.street(), cross.streets[0]);
        assert_eq!(vehicle.direction(), Direction::Forward);
        assert_eq!(sim.iter_vehicles().count(), 1);

        // The new vehicle still occupies the start of the street
        assert!(matches!(
            sim.spawn_vehicle(&request),
            Err(SpawnError::Blocked { .. })
        ));
        assert_eq!(sim.can_spawn(&request), sim.spawn_vehicle(&request).map(|_| ()));
        assert_eq!(sim.iter_vehicles().count(), 1);

        let mut cache = RoutingCache::new();
        for _ in 0..20 {
            sim.step(0.1, &mut cache);
        }
        assert_eq!(sim.can_spawn(&request), Ok(()));
        assert!(sim.spawn_vehicle(&request).is_ok());
    }

    #[test]
    fn jammed_vehicles_are_removed() {
        let cross = cross(300.0);
        let mut config = config();
        // East-west stays red for good
        config.lights.green = 1e6;
        let timeout = config.vehicles.stuck_timeout;
        let mut sim = Simulation::new(cross.net, ControlMode::FixedTimer, config);
        let mut cache = RoutingCache::new();

        let mut queue = vec![];
        for i in 0..3000 {
            if i % 40 == 0 && queue.len() < 3 {
                queue.push(spawn(&mut sim, cross.ends[0], cross.ends[2], i));
            }
            sim.step(0.1, &mut cache);
            for vehicle in sim.iter_vehicles() {
                assert!(vehicle.stuck_for(sim.time()) <= timeout + 0.1 + 1e-9);
            }
            if i == 500 {
                // Queued at the red light, but not for long enough to be removed
                assert_eq!(sim.iter_vehicles().count(), 3);
                assert!(sim.iter_vehicles().all(|v| v.has_stopped()));
            }
        }

        assert!(queue.iter().all(|id| sim.get_vehicle(*id).is_none()));
        assert_eq!(sim.retired.vehicles, 3);
        assert_eq!(sim.metrics().trips_completed, 0);
    }

    #[test]
    fn adaptive_all_red_never_outlasts_the_limit() {
        let cross = cross(300.0);
        let mut config = config();
        // Only a stall can end the all-red period
        config.adaptive.evaluation_interval = 10.0;
        let limit = config.adaptive.all_red_limit;
        let mut sim = Simulation::new(cross.net, ControlMode::Adaptive, config);
        let mut cache = RoutingCache::new();
        for light in sim.lights.values_mut() {
            light.set_state(LightState::Red);
        }

        let mut ended = None;
        for i in 1..=40 {
            sim.step(0.1, &mut cache);
            let int = sim.intersection(cross.centre).unwrap();
            assert!(int.all_red_for() <= limit + 0.1 + 1e-9);
            if ended.is_none() && sim.iter_lights().any(|(_, l)| l.state() != LightState::Red) {
                ended = Some(i as f64 * 0.1);
            }
        }
        assert!(ended.unwrap() < limit + 0.25);
    }

    #[test]
    fn vehicles_on_removed_streets_are_retired_once() {
        let cross = cross(100.0);
        let mut sim = Simulation::new(cross.net, ControlMode::FixedTimer, config());
        let mut cache = RoutingCache::new();
        let id = spawn(&mut sim, cross.ends[0], cross.ends[2], 0);
        for _ in 0..5 {
            sim.step(0.1, &mut cache);
        }
        sim.remove_street(cross.streets[0]).unwrap();
        sim.step(0.1, &mut cache);
        assert!(sim.get_vehicle(id).is_none());
        assert_eq!(sim.retired.vehicles, 1);
        sim.step(0.1, &mut cache);
        assert_eq!(sim.retired.vehicles, 1);
        assert_eq!(sim.metrics().vehicles, 0);
    }
}
