//! The adaptive controller: ranks approaching vehicles by estimated arrival time
//! and gives green to the phase they favour.

use super::{Intersection, LightState};
use crate::config::{AdaptiveParams, VehicleParams};
use crate::network::Network;
use crate::routing::Turn;
use crate::vehicle::STOP_SPEED;
use crate::{LightSet, StreetId, VehicleSet};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Arrival times closer than this share a rank, in s.
const RANK_EPSILON: f64 = 1e-6;

/// The outcome of evaluating an intersection under adaptive control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Leave the lights as they are.
    Hold,
    /// Every light is red and nothing is approaching: turn the given phase green.
    Initialize(usize),
    /// Switch to the given phase via yellow and waiting.
    Switch(usize),
    /// Every light has been red for too long: switch to the given phase.
    ForceSwitch(usize),
}

/// A vehicle heading into an intersection, as seen by the controller.
#[derive(Clone, Debug)]
struct Approach {
    street: StreetId,
    arrival: f64,
}

impl Intersection {
    /// Decides what the lights of this intersection should do next.
    pub fn evaluate(
        &self,
        network: &Network,
        lights: &LightSet,
        vehicles: &VehicleSet,
        params: &AdaptiveParams,
        vparams: &VehicleParams,
    ) -> Decision {
        let approaches = self.approaches(network, lights, vehicles, params, vparams);

        let times = approaches.iter().map(|a| a.arrival).collect::<Vec<_>>();
        let mut street_points = HashMap::<StreetId, f64>::new();
        for (approach, points) in approaches.iter().zip(rank_points(&times, params.rank_base)) {
            *street_points.entry(approach.street).or_default() += points;
        }

        let scores = self
            .groups()
            .iter()
            .map(|g| {
                g.lights()
                    .iter()
                    .filter_map(|id| lights.get(*id))
                    .filter_map(|l| street_points.get(&l.street()))
                    .sum::<f64>()
            })
            .collect::<SmallVec<[f64; 4]>>();

        let states = self
            .groups()
            .iter()
            .map(|g| g.state(lights))
            .collect::<SmallVec<[LightState; 4]>>();
        let green = states.iter().position(|s| *s == LightState::Green);
        let best = best_phase(&scores, green);

        if self.is_stalled(lights, params) {
            return Decision::ForceSwitch(best.unwrap_or(0));
        }
        if self.switch_target().is_some() {
            return Decision::Hold;
        }
        if approaches.is_empty() {
            return if self.all_red(lights) {
                Decision::Initialize(0)
            } else {
                Decision::Hold
            };
        }
        match best {
            Some(best) if matches!(states[best], LightState::Green | LightState::Waiting) => {
                Decision::Hold
            }
            Some(best) => Decision::Switch(best),
            None => Decision::Hold,
        }
    }

    /// Whether every light has been red for longer than the adaptive controller allows.
    /// A stalled intersection is evaluated straight away rather than at its next interval.
    pub(crate) fn is_stalled(&self, lights: &LightSet, params: &AdaptiveParams) -> bool {
        self.all_red(lights) && self.all_red_for() > params.all_red_limit
    }

    /// The vehicles approaching this intersection with their estimated arrival times.
    fn approaches(
        &self,
        network: &Network,
        lights: &LightSet,
        vehicles: &VehicleSet,
        params: &AdaptiveParams,
        vparams: &VehicleParams,
    ) -> Vec<Approach> {
        let location = self.location();
        let heading_here = vehicles
            .values()
            .filter(|v| !v.has_reached_destination())
            .filter(|v| v.exit_location(network) == Some(location))
            .filter(|v| self.light_for(v.street(), lights).is_some())
            .collect::<Vec<_>>();

        heading_here
            .iter()
            .filter(|v| v.progress() >= 1.0 - params.detection_range)
            .filter_map(|v| {
                let remaining = v.distance_to_end(network)?;
                if remaining <= vparams.intersection_radius {
                    return None;
                }
                let slower_ahead = heading_here
                    .iter()
                    .filter(|o| o.street() == v.street() && o.direction() == v.direction())
                    .filter(|o| o.progress() > v.progress() && o.speed() < v.speed())
                    .map(|o| o.speed())
                    .collect::<SmallVec<[f64; 8]>>();
                let arrival = arrival_time(
                    remaining,
                    v.speed(),
                    &slower_ahead,
                    v.next_turn() == Some(Turn::Right),
                    vparams.distance_scale,
                    params,
                );
                Some(Approach {
                    street: v.street(),
                    arrival,
                })
            })
            .collect()
    }
}

/// Estimates when a vehicle reaches the intersection, in s.
///
/// Slower vehicles ahead hold it to the slowest of their speeds, plus a delay per vehicle.
/// Stopped vehicles and vehicles turning right are penalised.
fn arrival_time(
    remaining: f64,
    speed: f64,
    slower_ahead: &[f64],
    turning_right: bool,
    distance_scale: f64,
    params: &AdaptiveParams,
) -> f64 {
    let units_per_sec = |speed: f64| speed.max(STOP_SPEED) * distance_scale;
    let mut time = match slower_ahead.iter().copied().reduce(f64::min) {
        Some(slowest) => {
            remaining / units_per_sec(slowest) + params.blocking_delay * slower_ahead.len() as f64
        }
        None => remaining / units_per_sec(speed),
    };
    if speed < STOP_SPEED {
        time += params.stopped_penalty;
    }
    if turning_right {
        time += params.right_turn_penalty;
    }
    time
}

/// Converts arrival times into points using competition ranking: the earliest arrival
/// has rank 1, equal times share a rank and the next distinct time skips ahead.
fn rank_points(times: &[f64], base: f64) -> Vec<f64> {
    times
        .iter()
        .map(|t| {
            let rank = 1 + times.iter().filter(|o| **o < *t - RANK_EPSILON).count();
            (base - rank as f64).max(0.0)
        })
        .collect()
}

/// The highest scoring phase, favouring the green phase on a tie.
fn best_phase(scores: &[f64], green: Option<usize>) -> Option<usize> {
    let max = scores.iter().copied().reduce(f64::max)?;
    match green {
        Some(g) if scores[g] >= max => Some(g),
        _ => scores.iter().position(|s| *s >= max),
    }
}
