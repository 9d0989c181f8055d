//! Cross-traffic conflicts between vehicles arriving at the same location from different streets.

use super::{Surroundings, Vehicle};
use crate::debug::{debug_box, debug_line};
use crate::math::OrientedBox;
use cgmath::prelude::*;
use itertools::Itertools;
use std::collections::HashMap;

/// Weight of speed in the right of way priority.
const SPEED_WEIGHT: f64 = 10.0;
/// Weight of progress along the street in the right of way priority.
const PROGRESS_WEIGHT: f64 = 5.0;
/// Bonus for a vehicle which the other is driving into.
const APPROACHED_BONUS: f64 = 5.0;

impl Surroundings<'_> {
    /// Finds pairs of vehicles on course to collide near the ends of their streets
    /// and holds the one with lower priority.
    pub fn yield_to_cross_traffic(&self) {
        let window = 1.0 - self.params.cross_traffic_window;
        let mut arriving = HashMap::<_, Vec<&Vehicle>>::new();
        for vehicle in self.vehicles.values() {
            if vehicle.has_reached_destination() || vehicle.progress() < window {
                continue;
            }
            if let Some(exit) = vehicle.exit_location(self.network) {
                arriving.entry(exit).or_default().push(vehicle);
            }
        }

        for vehicles in arriving.values() {
            for (a, b) in vehicles.iter().tuple_combinations() {
                if a.street() == b.street() {
                    continue;
                }
                if let Some(loser) = self.cross_traffic_loser(a, b) {
                    loser.hold();
                    debug_line("cross traffic", a.position(), b.position());
                    debug_box("yielding", &loser.footprint(self.params));
                }
            }
        }
    }

    /// The vehicle which must yield, if two vehicles are on course to collide.
    fn cross_traffic_loser<'v>(&self, a: &'v Vehicle, b: &'v Vehicle) -> Option<&'v Vehicle> {
        let box_a = a.footprint(self.params);
        let box_b = b.footprint(self.params);
        let swept_a = self.swept(a, &box_a);
        let swept_b = self.swept(b, &box_b);
        if !swept_a.overlaps(&swept_b) {
            return None;
        }

        let towards_b = (b.position() - a.position()).dot(a.heading()) > 0.0;
        let towards_a = (a.position() - b.position()).dot(b.heading()) > 0.0;
        if !(towards_a && towards_b) {
            return None;
        }

        let a_approached = swept_b.overlaps(&box_a.inflate(self.params.collision_margin));
        let b_approached = swept_a.overlaps(&box_b.inflate(self.params.collision_margin));
        Some(yielding(
            (a, right_of_way(a, a_approached)),
            (b, right_of_way(b, b_approached)),
        ))
    }

    fn swept(&self, vehicle: &Vehicle, footprint: &OrientedBox) -> OrientedBox {
        let reach = vehicle.speed() * self.params.distance_scale * self.params.collision_lookahead;
        footprint.sweep(reach).inflate(self.params.collision_margin)
    }
}

/// Of two vehicles with their priorities, the one which gives way.
/// On a tie the larger ID gives way.
fn yielding<'v>(a: (&'v Vehicle, f64), b: (&'v Vehicle, f64)) -> &'v Vehicle {
    let ((a, pa), (b, pb)) = (a, b);
    if pa > pb || (pa == pb && a.id() < b.id()) {
        b
    } else {
        a
    }
}

/// How strongly a vehicle claims the right of way at a conflict.
fn right_of_way(vehicle: &Vehicle, approached: bool) -> f64 {
    let bonus = if approached { APPROACHED_BONUS } else { 0.0 };
    vehicle.speed() * SPEED_WEIGHT + vehicle.progress() * PROGRESS_WEIGHT + bonus
}
