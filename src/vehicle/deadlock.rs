//! Resolution of gridlock between vehicles which block each other at a conflict point.

use super::{Surroundings, Vehicle, STOP_SPEED};
use crate::debug::debug_circle;
use crate::math::distance;
use crate::routing::Turn;
use crate::VehicleId;
use slotmap::SecondaryMap;

const SPEED_WEIGHT: f64 = 10.0;
const PROGRESS_WEIGHT: f64 = 5.0;

/// Priority bonus for the planned turn; straight on goes first.
fn turn_bonus(turn: Option<Turn>) -> f64 {
    match turn {
        Some(Turn::Straight) => 3.0,
        Some(Turn::Right) => 2.0,
        Some(Turn::Left) => 1.0,
        Some(Turn::UTurn) | None => 0.0,
    }
}

/// The priority of a vehicle when breaking a deadlock.
pub(crate) fn deadlock_priority(vehicle: &Vehicle, jitter: f64) -> f64 {
    vehicle.speed() * SPEED_WEIGHT
        + vehicle.progress() * PROGRESS_WEIGHT
        + turn_bonus(vehicle.next_turn())
        + jitter
}

/// Picks the winner among deadlocked vehicles: the highest priority, or the smallest ID on a tie.
pub(crate) fn deadlock_winner<'v>(
    vehicles: impl IntoIterator<Item = &'v Vehicle>,
    jitter: &SecondaryMap<VehicleId, f64>,
) -> Option<&'v Vehicle> {
    let priority = |v: &Vehicle| deadlock_priority(v, jitter.get(v.id()).copied().unwrap_or(0.0));
    vehicles.into_iter().reduce(|best, v| {
        let (pb, pv) = (priority(best), priority(v));
        if pv > pb || (pv == pb && v.id() < best.id()) {
            v
        } else {
            best
        }
    })
}

impl Surroundings<'_> {
    /// Releases one vehicle from every group of vehicles which have been stopped
    /// against each other for too long.
    ///
    /// Vehicles queued in the same lane never deadlock each other; car following
    /// already orders them.
    ///
    /// Run after the driving rules, since a release overrides any stop they decided.
    pub fn resolve_deadlocks(&self, now: f64, jitter: &SecondaryMap<VehicleId, f64>) {
        let stopping = |v: &Vehicle| v.has_stopped() || v.acceleration().target() < STOP_SPEED;

        for vehicle in self.vehicles.values() {
            if vehicle.has_reached_destination()
                || !stopping(vehicle)
                || vehicle.stopped_for(now) <= self.params.deadlock_wait
            {
                continue;
            }
            let lane = (vehicle.street(), vehicle.direction());
            let footprint = vehicle.footprint(self.params).inflate(self.params.collision_margin);
            let partners = self
                .vehicles
                .values()
                .filter(|o| o.id() != vehicle.id() && !o.has_reached_destination())
                .filter(|o| (o.street(), o.direction()) != lane)
                .filter(|o| o.stopped_for(now) >= self.params.deadlock_partner_wait)
                .filter(|o| {
                    distance(o.position(), vehicle.position()) <= self.params.deadlock_radius
                })
                .filter(|o| {
                    let theirs = o.footprint(self.params).inflate(self.params.collision_margin);
                    footprint.overlaps(&theirs)
                })
                .collect::<Vec<_>>();
            if partners.is_empty() {
                continue;
            }

            let group = std::iter::once(vehicle).chain(partners);
            if let Some(winner) = deadlock_winner(group, jitter) {
                log::debug!("releasing {:?} from deadlock", winner.id());
                winner.release();
                debug_circle("deadlock", winner.position(), self.params.deadlock_radius);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::VehicleParams;
    use crate::network::{Direction, Network};
    use crate::routing::{RouteChoice, VehicleGroupId};
    use crate::vehicle::test::{add_vehicle, junction, single_street};
    use crate::vehicle::Placement;
    use crate::{LightSet, LocationId, StreetId, VehicleSet};
    use assert_approx_eq::assert_approx_eq;
    use slotmap::SlotMap;

    fn place(a: LocationId, b: LocationId, s: StreetId) -> Placement {
        Placement {
            group: VehicleGroupId(0),
            parking: a,
            destination: b,
            street: s,
            direction: Direction::Forward,
            preferred_speed: 2.0,
        }
    }

    #[test]
    fn priority_formula() {
        let (_, a, b, s) = single_street();
        let params = VehicleParams::default();
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let mut v = Vehicle::new(ids.insert(()), place(a, b, s), &params, 0.0);
        v.speed = 0.5;
        v.progress = 0.8;
        v.next = Some(RouteChoice {
            street: s,
            direction: Direction::Backward,
            turn: Turn::Right,
        });
        assert_approx_eq!(deadlock_priority(&v, 0.0), 5.0 + 4.0 + 2.0);
        v.next = None;
        assert_approx_eq!(deadlock_priority(&v, 0.05), 9.05);
    }

    #[test]
    fn ties_go_to_the_smaller_id() {
        let (_, a, b, s) = single_street();
        let params = VehicleParams::default();
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let first = Vehicle::new(ids.insert(()), place(a, b, s), &params, 0.0);
        let second = Vehicle::new(ids.insert(()), place(a, b, s), &params, 0.0);
        assert!(first.id() < second.id());

        let none = SecondaryMap::new();
        for _ in 0..3 {
            let winner = deadlock_winner([&second, &first], &none).unwrap();
            assert_eq!(winner.id(), first.id());
        }

        let mut jitter = SecondaryMap::new();
        jitter.insert(second.id(), 0.01);
        let winner = deadlock_winner([&first, &second], &jitter).unwrap();
        assert_eq!(winner.id(), second.id());
    }

    fn stalled(vehicles: &mut VehicleSet, ids: &[VehicleId]) {
        for id in ids {
            vehicles[*id].time_not_moving_start = Some(0.0);
        }
    }

    fn resolve(net: &Network, vehicles: &VehicleSet, params: &VehicleParams) {
        let lights = LightSet::with_key();
        let intersections = SecondaryMap::new();
        let surroundings = Surroundings::new(net, &lights, &intersections, vehicles, params);
        for v in vehicles.values() {
            v.reset();
            v.hold();
        }
        surroundings.resolve_deadlocks(5.0, &SecondaryMap::new());
    }

    #[test]
    fn queued_vehicles_are_not_deadlocked() {
        let (net, _, _, s) = single_street();
        let params = VehicleParams::default();
        let mut vehicles = VehicleSet::with_key();
        let ids = [0.5, 0.52].map(|progress| {
            add_vehicle(&mut vehicles, &net, s, Direction::Forward, progress, 0.0)
        });
        stalled(&mut vehicles, &ids);

        resolve(&net, &vehicles, &params);
        assert!(ids.iter().all(|id| vehicles[*id].is_held()));
    }

    #[test]
    fn crossing_stopped_vehicles_release_one() {
        let (net, _, [east, north, ..]) = junction();
        let params = VehicleParams::default();
        let mut vehicles = VehicleSet::with_key();
        let first = add_vehicle(&mut vehicles, &net, east, Direction::Forward, 0.99, 0.0);
        let second = add_vehicle(&mut vehicles, &net, north, Direction::Forward, 0.99, 0.0);
        stalled(&mut vehicles, &[first, second]);

        for _ in 0..2 {
            resolve(&net, &vehicles, &params);
            // Equal priorities, so the smaller ID goes
            assert!(!vehicles[first].is_held());
            assert_approx_eq!(vehicles[first].acceleration().target(), 2.0);
            assert!(vehicles[second].is_held());
        }
    }
}
