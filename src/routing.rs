//! Street-to-street routing decisions at the end of each street.

use crate::math::{angle_difference, bearing};
use crate::network::{Direction, Network};
use crate::{LocationId, StreetId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Exits closer than this to the entry bearing are straight on, in degrees.
const STRAIGHT_LIMIT: f64 = 30.0;

/// Exits further than this from the entry bearing are U-turns, in degrees.
const UTURN_LIMIT: f64 = 150.0;

/// Identifies a vehicle and its twin in the other comparison panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleGroupId(pub u64);

/// The manoeuvre made when moving from one street onto the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Turn {
    Straight,
    Left,
    Right,
    UTurn,
}

/// A routing decision: the next street, the direction to travel it and the turn to get there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteChoice {
    pub street: StreetId,
    pub direction: Direction,
    pub turn: Turn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RouteKey {
    group: VehicleGroupId,
    location: LocationId,
    from_street: StreetId,
}

/// Remembers the random choices made at intersections, so that twin vehicles in
/// both panels take identical routes.
///
/// The cache belongs to a pair of panels running the same scenario and must be
/// cleared whenever a new network is loaded.
#[derive(Clone, Debug, Default)]
pub struct RoutingCache {
    decisions: HashMap<RouteKey, RouteChoice>,
}

impl RoutingCache {
    pub fn new() -> Self {
        Default::default()
    }

    /// Looks up the decision made by a vehicle group arriving at `location` from `from_street`.
    pub fn get(
        &self,
        group: VehicleGroupId,
        location: LocationId,
        from_street: StreetId,
    ) -> Option<RouteChoice> {
        let key = RouteKey {
            group,
            location,
            from_street,
        };
        self.decisions.get(&key).copied()
    }

    /// Pins a decision for the vehicle group.
    pub fn put(
        &mut self,
        group: VehicleGroupId,
        location: LocationId,
        from_street: StreetId,
        choice: RouteChoice,
    ) {
        let key = RouteKey {
            group,
            location,
            from_street,
        };
        self.decisions.insert(key, choice);
    }

    /// Forgets every decision.
    pub fn clear(&mut self) {
        self.decisions.clear();
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

impl Turn {
    /// Classifies the turn from a vehicle's travel bearing when arriving at a location
    /// to the bearing of the street it leaves along.
    pub fn classify(entry_bearing: f64, exit_bearing: f64) -> Self {
        let diff = angle_difference(entry_bearing, exit_bearing).to_degrees();
        if diff.abs() < STRAIGHT_LIMIT {
            Turn::Straight
        } else if diff.abs() > UTURN_LIMIT {
            Turn::UTurn
        } else if diff > 0.0 {
            Turn::Left
        } else {
            Turn::Right
        }
    }
}

/// Chooses the street a vehicle takes after arriving at `location` along `from_street`.
///
/// * Dead ends turn the vehicle around on the street it came from.
/// * Corners continue onto the only other street.
/// * Intersections choose uniformly among the other streets. The choice is pinned in
///   `cache` for the vehicle's group so its twin makes the same one.
///
/// Returns `None` if no street leaves the location.
pub fn find_best_next_street(
    network: &Network,
    location: LocationId,
    from_street: StreetId,
    group: VehicleGroupId,
    cache: &mut RoutingCache,
    rng: &mut impl Rng,
) -> Option<RouteChoice> {
    let streets = network.streets_at(location);
    let leave = |street: StreetId, turn: Turn| {
        let direction = network.street(street)?.direction_from(location);
        Some(RouteChoice {
            street,
            direction,
            turn,
        })
    };

    match streets.len() {
        0 => None,
        1 => leave(streets[0], Turn::UTurn),
        2 => {
            let next = streets.iter().copied().find(|id| *id != from_street)?;
            leave(next, Turn::Straight)
        }
        _ => {
            if let Some(choice) = cache.get(group, location, from_street) {
                if streets.contains(&choice.street) {
                    return Some(choice);
                }
            }

            let candidates = streets
                .iter()
                .copied()
                .filter(|id| *id != from_street)
                .collect::<Vec<_>>();
            let next = *candidates.choose(rng)?;

            let here = network.location(location)?.pos();
            let entry_bearing = match network.street(from_street) {
                Some(street) => {
                    let start = network.location(street.far_end(location))?.pos();
                    bearing(start, here)
                }
                None => network.bearing_from(location, next)?,
            };
            let exit_bearing = network.bearing_from(location, next)?;
            let choice = leave(next, Turn::classify(entry_bearing, exit_bearing))?;

            cache.put(group, location, from_street, choice);
            Some(choice)
        }
    }
}
