//! Tunable parameters of the simulation.
//!
//! The defaults are calibrated values; the adaptive scoring constants in particular
//! determine how the two controllers compare and should not be changed lightly.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The full set of simulation parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    pub lights: LightTimings,
    pub adaptive: AdaptiveParams,
    pub vehicles: VehicleParams,
    /// Seed for the random number generator; `None` seeds from entropy.
    pub seed: Option<u64>,
}

/// Durations of each traffic light state under fixed-timer control, in s.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LightTimings {
    pub green: f64,
    pub yellow: f64,
    pub red: f64,
    pub waiting: f64,
    /// The maximum random offset applied to the initial timers.
    pub initial_jitter: f64,
    /// Streets further than this from exactly opposite are never paired, in radians.
    pub pairing_tolerance: f64,
    /// The distance of a light from the centre of its intersection.
    pub light_offset: f64,
    /// How long every light may be red before the safety validator forces a phase green.
    pub all_red_limit: f64,
}

/// Parameters of the adaptive ("smart") controller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdaptiveParams {
    /// Time between evaluations of each intersection, in s.
    pub evaluation_interval: f64,
    /// Vehicles are detected within this fraction of the street length from the intersection.
    pub detection_range: f64,
    /// The delay added per slower vehicle blocking the way, in s.
    pub blocking_delay: f64,
    /// Penalty for a stopped vehicle, in s.
    pub stopped_penalty: f64,
    /// Penalty for a vehicle planning to turn right, in s.
    pub right_turn_penalty: f64,
    /// A vehicle ranked `r` contributes `rank_base - r` points.
    pub rank_base: f64,
    /// All lights red for longer than this forces a phase switch, in s.
    pub all_red_limit: f64,
}

/// Parameters of the vehicle model. Speeds are in units/s, distances in world units.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleParams {
    pub preferred_speed: f64,
    pub max_speed: f64,
    /// Standard deviation of the preferred speed factor sampled for new vehicles.
    pub speed_stddev: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub emergency_deceleration: f64,
    pub turn_deceleration: f64,
    /// World units travelled per unit of speed per second.
    pub distance_scale: f64,
    pub length: f64,
    pub width: f64,
    /// Below this gap to the vehicle ahead a follower stops entirely.
    pub min_gap: f64,
    /// Beyond this gap to the vehicle ahead a follower drives freely.
    pub safe_following_distance: f64,
    /// The radius of the circle around a location that counts as inside the intersection.
    pub intersection_radius: f64,
    /// The distance before the stop line over which a vehicle slows for a light.
    pub approach_zone: f64,
    /// Cross traffic is analysed within this fraction of the street length from its end.
    pub cross_traffic_window: f64,
    /// How far ahead in time swept collision boxes reach, in s.
    pub collision_lookahead: f64,
    pub collision_margin: f64,
    /// Turn signals, turn slowdown and left-turn yields apply within this final fraction.
    pub turn_zone: f64,
    /// The fraction of the preferred speed held while approaching a turn.
    pub turn_speed_factor: f64,
    /// Oncoming vehicles arriving within this time block a left turn, in s.
    pub left_turn_window: f64,
    /// A vehicle stopped for this long checks for deadlock, in s.
    pub deadlock_wait: f64,
    /// Other vehicles must have been stopped this long to take part in a deadlock, in s.
    pub deadlock_partner_wait: f64,
    pub deadlock_radius: f64,
    /// The maximum random jitter added to deadlock priorities.
    pub deadlock_jitter: f64,
    /// Vehicles stopped for longer than this are removed, in s.
    pub stuck_timeout: f64,
    /// Vehicles older than this are removed, in s.
    pub max_age: f64,
    /// Chance that a new destination is a parking lot.
    pub parking_destination_bias: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            lights: Default::default(),
            adaptive: Default::default(),
            vehicles: Default::default(),
            seed: None,
        }
    }
}

impl Default for LightTimings {
    fn default() -> Self {
        Self {
            green: 10.0,
            yellow: 2.0,
            red: 12.0,
            waiting: 0.5,
            initial_jitter: 2.0,
            pairing_tolerance: 0.25 * std::f64::consts::PI,
            light_offset: 18.0,
            all_red_limit: 3.0,
        }
    }
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            evaluation_interval: 1.0,
            detection_range: 0.9,
            blocking_delay: 0.5,
            stopped_penalty: 1.0,
            right_turn_penalty: 1.0,
            rank_base: 100.0,
            all_red_limit: 2.0,
        }
    }
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            preferred_speed: 2.0,
            max_speed: 3.0,
            speed_stddev: 0.1,
            acceleration: 1.2,
            deceleration: 2.4,
            emergency_deceleration: 5.0,
            turn_deceleration: 3.0,
            distance_scale: 20.0,
            length: 10.0,
            width: 5.0,
            min_gap: 4.0,
            safe_following_distance: 25.0,
            intersection_radius: 15.0,
            approach_zone: 60.0,
            cross_traffic_window: 0.25,
            collision_lookahead: 1.0,
            collision_margin: 1.0,
            turn_zone: 0.2,
            turn_speed_factor: 0.6,
            left_turn_window: 3.0,
            deadlock_wait: 3.0,
            deadlock_partner_wait: 2.0,
            deadlock_radius: 30.0,
            deadlock_jitter: 0.1,
            stuck_timeout: 60.0,
            max_age: 600.0,
            parking_destination_bias: 0.7,
        }
    }
}
