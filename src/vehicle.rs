use self::acceleration::{AccelerationModel, Braking};
use crate::config::VehicleParams;
use crate::math::{OrientedBox, Point2d, Vector2d};
use crate::metrics::VehicleStats;
use crate::network::{Direction, LocationKind, Network};
use crate::routing::{find_best_next_street, RouteChoice, RoutingCache, Turn, VehicleGroupId};
use crate::{LocationId, StreetId, VehicleId};
use rand::seq::IteratorRandom;
use rand::Rng;
use std::cell::Cell;

pub(crate) use self::rules::Surroundings;

mod acceleration;
pub(crate) mod collision;
pub(crate) mod deadlock;
pub(crate) mod rules;

/// Vehicles slower than this, in units/s, are considered stopped.
pub const STOP_SPEED: f64 = 0.1;

/// The progress of a vehicle which has just entered a street.
/// Kept away from 0 and 1 so end-of-street logic never retriggers immediately.
pub const ENTRY_OFFSET: f64 = 0.01;

/// The number of recently travelled streets remembered in a vehicle's path.
const PATH_HISTORY: usize = 32;

/// Why a vehicle has been told to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    /// Queued behind another vehicle.
    Vehicle,
    /// Yielding to crossing traffic.
    CrossTraffic,
    /// A red, yellow or waiting light.
    Light,
    /// Giving way to oncoming traffic before turning left.
    Yield,
}

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    id: VehicleId,
    /// Shared with the vehicle's twin in the other panel.
    group: VehicleGroupId,
    start_location: LocationId,
    destination: LocationId,
    street: StreetId,
    direction: Direction,
    /// Position along the street in the direction of travel, strictly between 0 and 1.
    progress: f64,
    speed: f64,
    preferred_speed: f64,
    max_speed: f64,
    /// Set when the vehicle can no longer be simulated; it is removed at the next cleanup.
    reached_destination: bool,
    /// Whether the vehicle's statistics have been folded into its panel's totals.
    counted: bool,
    stops: u32,
    time_not_moving: f64,
    time_not_moving_start: Option<f64>,
    /// `total_distance` when the vehicle last advanced by its own length, and when that was.
    progress_mark: (f64, f64),
    /// Recently completed streets, oldest first.
    path: Vec<StreetId>,
    /// The street to take at the end of the current one.
    next: Option<RouteChoice>,
    waiting_to_turn_left: Cell<bool>,
    streets_traveled: u32,
    total_travel_time: f64,
    current_street_start_time: f64,
    turn_signal_start_time: Option<f64>,
    total_distance: f64,
    created_at: f64,
    trips_completed: u32,
    acc: AccelerationModel,
    stop_cause: Cell<Option<StopCause>>,
    /// Whether cross traffic is forcing the vehicle to a standstill this step.
    held: Cell<bool>,
    world_pos: Point2d,
    world_dir: Vector2d,
}

/// The validated fields needed to place a new vehicle.
pub(crate) struct Placement {
    pub group: VehicleGroupId,
    pub parking: LocationId,
    pub destination: LocationId,
    pub street: StreetId,
    pub direction: Direction,
    pub preferred_speed: f64,
}

impl Vehicle {
    /// Creates a new vehicle at the start of its egress street.
    pub(crate) fn new(id: VehicleId, place: Placement, params: &VehicleParams, now: f64) -> Self {
        Self {
            id,
            group: place.group,
            start_location: place.parking,
            destination: place.destination,
            street: place.street,
            direction: place.direction,
            progress: ENTRY_OFFSET,
            speed: 0.0,
            preferred_speed: place.preferred_speed,
            max_speed: params.max_speed.max(place.preferred_speed),
            reached_destination: false,
            counted: false,
            stops: 0,
            time_not_moving: 0.0,
            time_not_moving_start: None,
            progress_mark: (0.0, now),
            path: vec![],
            next: None,
            waiting_to_turn_left: Cell::new(false),
            streets_traveled: 0,
            total_travel_time: 0.0,
            current_street_start_time: now,
            turn_signal_start_time: None,
            total_distance: 0.0,
            created_at: now,
            trips_completed: 0,
            acc: AccelerationModel::new(params),
            stop_cause: Cell::new(None),
            held: Cell::new(false),
            world_pos: Point2d::new(0.0, 0.0),
            world_dir: Vector2d::new(1.0, 0.0),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The group shared with the vehicle's twin in the other panel.
    pub fn group(&self) -> VehicleGroupId {
        self.group
    }

    pub fn start_location(&self) -> LocationId {
        self.start_location
    }

    pub fn destination(&self) -> LocationId {
        self.destination
    }

    /// The street the vehicle is travelling along.
    pub fn street(&self) -> StreetId {
        self.street
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The position along the current street, in the direction of travel.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// The vehicle's speed in units/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn preferred_speed(&self) -> f64 {
        self.preferred_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Whether the vehicle is done and will be removed.
    pub fn has_reached_destination(&self) -> bool {
        self.reached_destination
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.speed < STOP_SPEED
    }

    /// How long the vehicle has been stopped without interruption, in s.
    pub fn stopped_for(&self, now: f64) -> f64 {
        self.time_not_moving_start
            .map(|start| now - start)
            .unwrap_or(0.0)
    }

    /// How long since the vehicle last advanced by at least its own length, in s.
    ///
    /// Unlike [`stopped_for`](Self::stopped_for) this keeps counting while the vehicle
    /// creeps forward in a jam.
    pub fn stuck_for(&self, now: f64) -> f64 {
        now - self.progress_mark.1
    }

    /// The turn the vehicle will make at the end of its street, if planned.
    pub fn next_turn(&self) -> Option<Turn> {
        self.next.map(|c| c.turn)
    }

    /// The planned next street.
    pub fn next_choice(&self) -> Option<RouteChoice> {
        self.next
    }

    /// Whether the vehicle is giving way to oncoming traffic before turning left.
    pub fn is_waiting_to_turn_left(&self) -> bool {
        self.waiting_to_turn_left.get()
    }

    /// When the turn signal was switched on, if it is.
    pub fn turn_signal_start_time(&self) -> Option<f64> {
        self.turn_signal_start_time
    }

    /// Recently completed streets, oldest first.
    pub fn path(&self) -> &[StreetId] {
        &self.path
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// When the vehicle entered its current street.
    pub fn current_street_start_time(&self) -> f64 {
        self.current_street_start_time
    }

    /// The number of journeys which ended at the vehicle's destination.
    pub fn trips_completed(&self) -> u32 {
        self.trips_completed
    }

    /// The coordinates in world space of the centre of the vehicle.
    pub fn position(&self) -> Point2d {
        self.world_pos
    }

    /// A unit vector in world space aligned with the vehicle's heading.
    pub fn heading(&self) -> Vector2d {
        self.world_dir
    }

    /// The statistics which feed the panel metrics.
    pub fn stats(&self) -> VehicleStats {
        VehicleStats {
            stops: self.stops,
            time_not_moving: self.time_not_moving,
            total_distance: self.total_distance,
            streets_traveled: self.streets_traveled,
            total_travel_time: self.total_travel_time,
        }
    }

    /// The vehicle's footprint, in world space.
    pub fn footprint(&self, params: &VehicleParams) -> OrientedBox {
        OrientedBox::new(
            self.world_pos,
            self.world_dir,
            0.5 * params.length,
            0.5 * params.width,
        )
    }

    /// The location at the end of the current street.
    pub(crate) fn exit_location(&self, network: &Network) -> Option<LocationId> {
        network.street(self.street).map(|s| s.exit(self.direction))
    }

    /// The remaining distance to the end of the current street, in world units.
    pub(crate) fn distance_to_end(&self, network: &Network) -> Option<f64> {
        network
            .street_length(self.street)
            .map(|len| (1.0 - self.progress) * len)
    }

    /// Marks the vehicle's statistics as folded into its panel's totals.
    /// Returns `false` if they had already been.
    pub(crate) fn take_count(&mut self) -> bool {
        !std::mem::replace(&mut self.counted, true)
    }

    pub(crate) fn acceleration(&self) -> &AccelerationModel {
        &self.acc
    }

    /// Whether cross traffic is holding the vehicle at a standstill.
    pub fn is_held(&self) -> bool {
        self.held.get()
    }

    /// Resets the per-step driving decisions.
    pub(crate) fn reset(&self) {
        self.acc.reset(self.preferred_speed);
        self.stop_cause.set(None);
        self.held.set(false);
        self.waiting_to_turn_left.set(false);
    }

    /// Lowers the vehicle's target speed. Targets below [`STOP_SPEED`] record `cause`.
    pub(crate) fn limit_speed(&self, speed: f64, braking: Braking, cause: StopCause) {
        self.acc.limit(speed, braking);
        if speed < STOP_SPEED {
            self.stop_cause.set(Some(cause));
        }
    }

    /// Brings the vehicle to a standstill to let crossing traffic pass.
    pub(crate) fn hold(&self) {
        self.limit_speed(0.0, Braking::Emergency, StopCause::CrossTraffic);
        self.held.set(true);
    }

    pub(crate) fn wait_to_turn_left(&self) {
        self.waiting_to_turn_left.set(true);
    }

    /// Overrides every stop decided this step, letting the vehicle drive on.
    pub(crate) fn release(&self) {
        self.acc.reset(self.preferred_speed);
        self.stop_cause.set(None);
        self.held.set(false);
        self.waiting_to_turn_left.set(false);
    }

    /// Checks that the vehicle's street and its ends still exist, marking the vehicle
    /// as done if not. Drops a planned turn onto a street that has gone.
    pub(crate) fn validate(&mut self, network: &Network) {
        let exit = match network.street(self.street) {
            Some(street)
                if network.location(street.from()).is_some()
                    && network.location(street.to()).is_some() =>
            {
                street.exit(self.direction)
            }
            _ => {
                log::debug!("{:?} lost its street", self.id);
                self.reached_destination = true;
                return;
            }
        };
        let next_valid = self
            .next
            .map(|c| network.street(c.street).map_or(false, |s| s.touches(exit)))
            .unwrap_or(true);
        if !next_valid {
            self.next = None;
        }
    }

    /// Chooses the street to take at the end of the current one, if not already chosen.
    pub(crate) fn plan_route(
        &mut self,
        network: &Network,
        cache: &mut RoutingCache,
        rng: &mut impl Rng,
    ) {
        if self.next.is_some() || self.reached_destination {
            return;
        }
        let Some(exit) = self.exit_location(network) else {
            return;
        };
        self.next = if network.kind(exit) == LocationKind::Parking {
            Some(RouteChoice {
                street: self.street,
                direction: self.direction.reverse(),
                turn: Turn::UTurn,
            })
        } else {
            find_best_next_street(network, exit, self.street, self.group, cache, rng)
        };
    }

    /// Integrates the vehicle's speed and position, and keeps its statistics.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    /// * `now` - The simulation time at the end of the step
    pub(crate) fn integrate(
        &mut self,
        dt: f64,
        now: f64,
        network: &Network,
        params: &VehicleParams,
    ) {
        if self.reached_destination {
            return;
        }
        let Some(length) = network.street_length(self.street) else {
            self.reached_destination = true;
            return;
        };

        let was_moving = self.speed > STOP_SPEED;
        let speed = if self.held.get() {
            0.0
        } else {
            self.acc.approach(self.speed, dt).clamp(0.0, self.max_speed)
        };
        self.total_distance += 0.5 * (self.speed + speed) * dt;
        self.speed = speed;
        if (self.total_distance - self.progress_mark.0) * params.distance_scale >= params.length {
            self.progress_mark = (self.total_distance, now);
        }

        if self.has_stopped() {
            if was_moving && self.stop_cause.get().is_some() {
                self.stops += 1;
            }
            self.time_not_moving += dt;
            self.time_not_moving_start.get_or_insert(now - dt);
        } else {
            self.time_not_moving_start = None;
        }

        let in_turn_zone = self.progress >= 1.0 - params.turn_zone;
        match self.next_turn() {
            Some(Turn::Left | Turn::Right) if in_turn_zone => {
                self.turn_signal_start_time.get_or_insert(now);
            }
            _ => {}
        }

        let travelled = speed * dt * params.distance_scale / length.max(f64::EPSILON);
        let progress = self.progress + travelled;
        // A stopped or held vehicle may not leave its street, nor roll back along it
        self.progress = if progress >= 1.0 && (self.has_stopped() || self.held.get()) {
            self.progress.max(1.0 - ENTRY_OFFSET)
        } else {
            progress
        };
    }

    /// Handles the vehicle reaching the end of its street: moves it onto its next street,
    /// or turns it around where it is if there is nowhere to go.
    pub(crate) fn advance(
        &mut self,
        network: &Network,
        now: f64,
        cache: &mut RoutingCache,
        rng: &mut impl Rng,
        params: &VehicleParams,
    ) {
        if self.reached_destination || self.progress < 1.0 {
            return;
        }
        let Some(here) = self.exit_location(network) else {
            self.reached_destination = true;
            return;
        };

        self.streets_traveled += 1;
        self.total_travel_time += now - self.current_street_start_time;
        self.current_street_start_time = now;
        self.path.push(self.street);
        if self.path.len() > PATH_HISTORY {
            self.path.remove(0);
        }

        let turn_around = RouteChoice {
            street: self.street,
            direction: self.direction.reverse(),
            turn: Turn::UTurn,
        };
        let choice = if network.kind(here) == LocationKind::Parking {
            if here == self.destination {
                self.trips_completed += 1;
            }
            self.destination =
                random_parking_lot(network, here, rng).unwrap_or(self.start_location);
            Some(turn_around)
        } else {
            if here == self.destination {
                self.trips_completed += 1;
                self.destination = random_destination(network, here, params, rng).unwrap_or(here);
            }
            self.next
                .filter(|c| network.street(c.street).map_or(false, |s| s.touches(here)))
                .or_else(|| {
                    find_best_next_street(network, here, self.street, self.group, cache, rng)
                })
        };

        self.enter(choice.unwrap_or(turn_around));
        self.plan_route(network, cache, rng);
    }

    /// Places the vehicle at the start of a street.
    fn enter(&mut self, choice: RouteChoice) {
        self.street = choice.street;
        self.direction = choice.direction;
        self.progress = ENTRY_OFFSET;
        self.next = None;
        self.turn_signal_start_time = None;
        self.waiting_to_turn_left.set(false);
    }

    /// Updates the vehicle's world coordinates.
    pub(crate) fn update_coords(&mut self, network: &Network) {
        let pos = network.point_along(self.street, self.direction, self.progress);
        let dir = network.heading(self.street, self.direction);
        match (pos, dir) {
            (Some(pos), Some(dir)) => {
                self.world_pos = pos;
                self.world_dir = dir;
            }
            _ => self.reached_destination = true,
        }
    }
}

/// A random parking lot other than `here`.
fn random_parking_lot(
    network: &Network,
    here: LocationId,
    rng: &mut impl Rng,
) -> Option<LocationId> {
    network.parking_lots().filter(|id| *id != here).choose(rng)
}

/// A random location other than `here` which is neither a parking lot nor isolated.
fn random_junction(network: &Network, here: LocationId, rng: &mut impl Rng) -> Option<LocationId> {
    network
        .iter_locations()
        .map(|l| l.id())
        .filter(|id| *id != here)
        .filter(|id| {
            !matches!(
                network.kind(*id),
                LocationKind::Parking | LocationKind::Island
            )
        })
        .choose(rng)
}

/// A random new destination, biased towards parking lots.
fn random_destination(
    network: &Network,
    here: LocationId,
    params: &VehicleParams,
    rng: &mut impl Rng,
) -> Option<LocationId> {
    if rng.gen_bool(params.parking_destination_bias.clamp(0.0, 1.0)) {
        random_parking_lot(network, here, rng).or_else(|| random_junction(network, here, rng))
    } else {
        random_junction(network, here, rng).or_else(|| random_parking_lot(network, here, rng))
    }
}
