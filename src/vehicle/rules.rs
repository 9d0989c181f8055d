//! The per-vehicle driving rules which lower a vehicle's target speed each step.

use super::acceleration::Braking;
use super::{StopCause, Vehicle, STOP_SPEED};
use crate::config::VehicleParams;
use crate::light::{Intersection, LightState};
use crate::network::{Direction, Network};
use crate::routing::Turn;
use crate::{LightSet, LocationId, StreetId, VehicleId, VehicleSet};
use slotmap::SecondaryMap;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Within this distance of the stop line a slowing vehicle stops entirely.
const STOP_LINE_SLACK: f64 = 0.5;

type Lane = SmallVec<[VehicleId; 8]>;

/// A read-only view of everything a vehicle reacts to during a step.
pub(crate) struct Surroundings<'a> {
    pub network: &'a Network,
    pub lights: &'a LightSet,
    pub intersections: &'a SecondaryMap<LocationId, Intersection>,
    pub vehicles: &'a VehicleSet,
    pub params: &'a VehicleParams,
    /// The vehicles on each street and direction, in order of increasing progress.
    lanes: HashMap<(StreetId, Direction), Lane>,
}

impl<'a> Surroundings<'a> {
    pub fn new(
        network: &'a Network,
        lights: &'a LightSet,
        intersections: &'a SecondaryMap<LocationId, Intersection>,
        vehicles: &'a VehicleSet,
        params: &'a VehicleParams,
    ) -> Self {
        let mut lanes = HashMap::<_, Lane>::new();
        for vehicle in vehicles.values().filter(|v| !v.has_reached_destination()) {
            lanes
                .entry((vehicle.street(), vehicle.direction()))
                .or_default()
                .push(vehicle.id());
        }
        for lane in lanes.values_mut() {
            lane.sort_by(|a, b| vehicles[*a].progress().total_cmp(&vehicles[*b].progress()));
        }
        Self {
            network,
            lights,
            intersections,
            vehicles,
            params,
            lanes,
        }
    }

    /// The vehicles travelling along a street in the given direction, rearmost first.
    pub fn lane(&self, street: StreetId, direction: Direction) -> impl Iterator<Item = &Vehicle> {
        self.lanes
            .get(&(street, direction))
            .into_iter()
            .flatten()
            .filter_map(|id| self.vehicles.get(*id))
    }

    /// Applies every driving rule to a vehicle.
    pub fn apply_rules(&self, vehicle: &Vehicle) {
        if vehicle.has_reached_destination() {
            return;
        }
        self.follow(vehicle);
        self.obey_signal(vehicle);
        self.yield_left_turn(vehicle);
        self.slow_for_turn(vehicle);
    }

    /// Keeps a safe distance behind the vehicle ahead, which may already be on the next street.
    fn follow(&self, vehicle: &Vehicle) {
        let Some(length) = self.network.street_length(vehicle.street()) else {
            return;
        };
        let ahead = self
            .lane(vehicle.street(), vehicle.direction())
            .find(|v| v.progress() > vehicle.progress() && v.id() != vehicle.id())
            .map(|leader| ((leader.progress() - vehicle.progress()) * length, leader));

        let ahead = ahead.or_else(|| {
            let next = vehicle.next_choice()?;
            let next_length = self.network.street_length(next.street)?;
            let leader = self
                .lane(next.street, next.direction)
                .find(|v| v.id() != vehicle.id())?;
            let dist = (1.0 - vehicle.progress()) * length + leader.progress() * next_length;
            Some((dist, leader))
        });

        if let Some((dist, leader)) = ahead {
            let gap = dist - self.params.length;
            let preferred = vehicle.preferred_speed();
            if let Some((speed, braking)) =
                following_speed(gap, leader.speed(), preferred, self.params)
            {
                vehicle.limit_speed(speed, braking, StopCause::Vehicle);
            }
        }
    }

    /// Stops before the stop line of a light which isn't green.
    fn obey_signal(&self, vehicle: &Vehicle) {
        let Some((intersection, remaining)) = self.approaching(vehicle) else {
            return;
        };
        let Some(light) = intersection.light_for(vehicle.street(), self.lights) else {
            return;
        };
        let stop_dist = self.stop_distance(remaining);
        let must_stop = match light.state() {
            LightState::Green => false,
            LightState::Red | LightState::Waiting => true,
            LightState::Yellow => {
                let can_stop = self.braking_distance(vehicle, Braking::Emergency) <= stop_dist;
                stop_dist > 0.0 && can_stop
            }
        };
        if must_stop {
            self.stop_at_line(vehicle, stop_dist, StopCause::Light);
        }
    }

    /// Gives way to oncoming traffic before turning left.
    /// Oncoming vehicles which are also turning left don't need to be given way to.
    fn yield_left_turn(&self, vehicle: &Vehicle) {
        if vehicle.next_turn() != Some(Turn::Left) || !self.in_turn_zone(vehicle) {
            return;
        }
        let Some((intersection, remaining)) = self.approaching(vehicle) else {
            return;
        };
        let location = intersection.location();
        let green = intersection
            .light_for(vehicle.street(), self.lights)
            .map_or(false, |l| l.state() == LightState::Green);
        if !green {
            return;
        }

        let oncoming = intersection
            .opposing_streets(vehicle.street(), self.lights)
            .into_iter()
            .filter_map(|id| {
                let street = self.network.street(id)?;
                Some((id, street.direction_from(street.far_end(location))))
            })
            .flat_map(|(street, dir)| self.lane(street, dir))
            .filter(|v| v.next_turn() != Some(Turn::Left))
            .any(|v| {
                let Some(dist) = v.distance_to_end(self.network) else {
                    return false;
                };
                if dist <= self.params.intersection_radius {
                    return true;
                }
                let time = (dist - self.params.intersection_radius)
                    / (v.speed().max(STOP_SPEED) * self.params.distance_scale);
                time < self.params.left_turn_window
            });

        if oncoming {
            vehicle.wait_to_turn_left();
            self.stop_at_line(vehicle, self.stop_distance(remaining), StopCause::Yield);
        }
    }

    /// Slows down ahead of a left or right turn.
    fn slow_for_turn(&self, vehicle: &Vehicle) {
        let turning = matches!(vehicle.next_turn(), Some(Turn::Left | Turn::Right));
        if turning && self.in_turn_zone(vehicle) {
            vehicle.limit_speed(
                vehicle.preferred_speed() * self.params.turn_speed_factor,
                Braking::Turn,
                StopCause::Vehicle,
            );
        }
    }

    /// The intersection at the end of the vehicle's street and the remaining distance to it,
    /// unless the vehicle is already inside it.
    fn approaching(&self, vehicle: &Vehicle) -> Option<(&Intersection, f64)> {
        let exit = vehicle.exit_location(self.network)?;
        let intersection = self.intersections.get(exit)?;
        let remaining = vehicle.distance_to_end(self.network)?;
        (remaining > self.params.intersection_radius).then_some((intersection, remaining))
    }

    /// The distance from the front of a vehicle to the stop line.
    fn stop_distance(&self, remaining: f64) -> f64 {
        remaining - self.params.intersection_radius - 0.5 * self.params.length
    }

    /// The world distance needed to come to a halt.
    fn braking_distance(&self, vehicle: &Vehicle, braking: Braking) -> f64 {
        let distance = vehicle.acceleration().stopping_distance(vehicle.speed(), braking);
        distance * self.params.distance_scale
    }

    fn in_turn_zone(&self, vehicle: &Vehicle) -> bool {
        vehicle.progress() >= 1.0 - self.params.turn_zone
    }

    /// Slows a vehicle so it comes to rest at the stop line.
    fn stop_at_line(&self, vehicle: &Vehicle, stop_dist: f64, cause: StopCause) {
        if stop_dist >= self.params.approach_zone {
            return;
        }
        let speed = if stop_dist <= STOP_LINE_SLACK {
            0.0
        } else {
            vehicle.preferred_speed() * stop_dist / self.params.approach_zone
        };
        let braking = if self.braking_distance(vehicle, Braking::Normal) > stop_dist.max(0.0) {
            Braking::Emergency
        } else {
            Braking::Normal
        };
        vehicle.limit_speed(speed, braking, cause);
    }
}

/// The speed at which to follow a leader `gap` units ahead, if it needs limiting.
///
/// Below the minimum gap the follower stops. Up to the safe following distance its
/// speed blends from the leader's speed to its own preferred speed.
fn following_speed(
    gap: f64,
    leader_speed: f64,
    preferred: f64,
    params: &VehicleParams,
) -> Option<(f64, Braking)> {
    if gap < params.min_gap {
        Some((0.0, Braking::Emergency))
    } else if gap < params.safe_following_distance {
        let ratio = (gap - params.min_gap) / (params.safe_following_distance - params.min_gap);
        let base = leader_speed.min(preferred);
        Some((base + ratio * (preferred - base), Braking::Normal))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LightTimings;
    use crate::routing::RouteChoice;
    use crate::vehicle::test::{add_vehicle, junction};
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// The test junction with its lights: north-south green, east-west red.
    struct Lit {
        net: Network,
        lights: LightSet,
        intersections: SecondaryMap<LocationId, Intersection>,
        /// East, north, west, south
        streets: [StreetId; 4],
    }

    fn lit_junction() -> Lit {
        let (net, centre, streets) = junction();
        let timings = LightTimings {
            initial_jitter: 0.0,
            ..Default::default()
        };
        let mut lights = LightSet::with_key();
        let mut rng = StdRng::seed_from_u64(1);
        let int = Intersection::build(centre, &net, &mut lights, &timings, &mut rng).unwrap();
        let mut intersections = SecondaryMap::new();
        intersections.insert(centre, int);
        Lit {
            net,
            lights,
            intersections,
            streets,
        }
    }

    impl Lit {
        fn surroundings<'a>(
            &'a self,
            vehicles: &'a VehicleSet,
            params: &'a VehicleParams,
        ) -> Surroundings<'a> {
            Surroundings::new(&self.net, &self.lights, &self.intersections, vehicles, params)
        }

        fn light(&self, street: StreetId) -> LightState {
            self.intersections
                .values()
                .find_map(|int| int.light_for(street, &self.lights))
                .map(|l| l.state())
                .unwrap()
        }

        /// Leaving the centre along the given arm.
        fn exit(&self, arm: usize, turn: Turn) -> Option<RouteChoice> {
            Some(RouteChoice {
                street: self.streets[arm],
                direction: Direction::Backward,
                turn,
            })
        }
    }

    #[test]
    fn stops_at_a_red_light() {
        let lit = lit_junction();
        let [east, north, ..] = lit.streets;
        assert_eq!(lit.light(east), LightState::Red);
        assert_eq!(lit.light(north), LightState::Green);

        let params = VehicleParams::default();
        let mut vehicles = VehicleSet::with_key();
        // 0.4 units short of the stop line
        let at_red = add_vehicle(&mut vehicles, &lit.net, east, Direction::Forward, 0.796, 0.5);
        let far = add_vehicle(&mut vehicles, &lit.net, east, Direction::Forward, 0.1, 2.0);
        let at_green = add_vehicle(&mut vehicles, &lit.net, north, Direction::Forward, 0.796, 0.5);

        let s = lit.surroundings(&vehicles, &params);
        for v in vehicles.values() {
            v.reset();
            s.obey_signal(v);
        }
        assert_eq!(vehicles[at_red].acceleration().target(), 0.0);
        assert_eq!(vehicles[at_red].stop_cause.get(), Some(StopCause::Light));
        assert_approx_eq!(vehicles[far].acceleration().target(), 2.0);
        assert_approx_eq!(vehicles[at_green].acceleration().target(), 2.0);
    }

    #[test]
    fn vehicle_inside_the_intersection_continues_through_red() {
        let lit = lit_junction();
        let east = lit.streets[0];
        let params = VehicleParams::default();
        let mut vehicles = VehicleSet::with_key();
        // 10 units from the centre, inside the intersection circle
        let id = add_vehicle(&mut vehicles, &lit.net, east, Direction::Forward, 0.9, 1.0);

        let s = lit.surroundings(&vehicles, &params);
        vehicles[id].reset();
        s.apply_rules(&vehicles[id]);
        assert_approx_eq!(vehicles[id].acceleration().target(), 2.0);
        assert_eq!(vehicles[id].stop_cause.get(), None);
    }

    #[test]
    fn left_turn_yields_to_oncoming_traffic() {
        let lit = lit_junction();
        let [_, north, _, south] = lit.streets;
        let params = VehicleParams::default();
        let mut vehicles = VehicleSet::with_key();
        // Heading north, turning left onto the western arm
        let turning = add_vehicle(&mut vehicles, &lit.net, south, Direction::Forward, 0.82, 0.5);
        vehicles[turning].next = lit.exit(2, Turn::Left);
        // Heading south, 35 units from the intersection circle at 40 units/s
        let oncoming = add_vehicle(&mut vehicles, &lit.net, north, Direction::Forward, 0.5, 2.0);

        // Straight ahead then right: the turning vehicle gives way to both
        for next in [lit.exit(3, Turn::Straight), lit.exit(2, Turn::Right)] {
            vehicles[oncoming].next = next;
            let s = lit.surroundings(&vehicles, &params);
            vehicles[turning].reset();
            s.yield_left_turn(&vehicles[turning]);
            assert!(vehicles[turning].is_waiting_to_turn_left());
            assert_eq!(vehicles[turning].acceleration().target(), 0.0);
            assert_eq!(vehicles[turning].stop_cause.get(), Some(StopCause::Yield));
        }

        // Oncoming left turners don't conflict
        vehicles[oncoming].next = lit.exit(0, Turn::Left);
        let s = lit.surroundings(&vehicles, &params);
        vehicles[turning].reset();
        s.yield_left_turn(&vehicles[turning]);
        assert!(!vehicles[turning].is_waiting_to_turn_left());
        assert_approx_eq!(vehicles[turning].acceleration().target(), 2.0);
    }

    #[test]
    fn left_turn_goes_ahead_of_distant_traffic() {
        let lit = lit_junction();
        let [_, north, _, south] = lit.streets;
        let mut params = VehicleParams::default();
        params.left_turn_window = 0.5;
        let mut vehicles = VehicleSet::with_key();
        let turning = add_vehicle(&mut vehicles, &lit.net, south, Direction::Forward, 0.82, 0.5);
        vehicles[turning].next = lit.exit(2, Turn::Left);
        // 35 units away at 20 units/s: 1.75 s
        let oncoming = add_vehicle(&mut vehicles, &lit.net, north, Direction::Forward, 0.5, 1.0);
        vehicles[oncoming].next = lit.exit(3, Turn::Straight);

        let s = lit.surroundings(&vehicles, &params);
        vehicles[turning].reset();
        s.yield_left_turn(&vehicles[turning]);
        assert!(!vehicles[turning].is_waiting_to_turn_left());
    }

    #[test]
    fn following_blends_towards_preferred_speed() {
        let params = VehicleParams::default();
        assert_eq!(following_speed(2.0, 1.0, 2.0, &params), Some((0.0, Braking::Emergency)));
        assert_eq!(following_speed(30.0, 0.0, 2.0, &params), None);

        let (speed, braking) = following_speed(14.5, 0.0, 2.0, &params).unwrap();
        assert_approx_eq!(speed, 1.0);
        assert_eq!(braking, Braking::Normal);

        // A faster leader never pushes the follower beyond its preferred speed
        let (speed, _) = following_speed(10.0, 3.0, 2.0, &params).unwrap();
        assert_approx_eq!(speed, 2.0);
    }
}
