use super::grouping::{group_bearings, Axis};
use super::{Decision, LightState, TrafficLight};
use crate::config::LightTimings;
use crate::math::{rot90, unit_vector};
use crate::network::Network;
use crate::util::rotated_range;
use crate::{LightSet, LocationId, StreetId, TrafficLightId};
use rand::Rng;
use smallvec::SmallVec;

/// The maximum number of lights which may be green at a four-way intersection.
const MAX_GREEN_FOUR_WAY: usize = 2;

/// The traffic lights of one intersection, grouped into phases.
#[derive(Clone, Debug)]
pub struct Intersection {
    location: LocationId,
    /// The streets present when the lights were built.
    streets: SmallVec<[StreetId; 4]>,
    groups: SmallVec<[PhaseGroup; 4]>,
    /// The phase an adaptive switch is heading towards.
    switch_target: Option<usize>,
    /// Time since the adaptive controller last evaluated this intersection.
    since_evaluation: f64,
    /// Time for which every light has been red.
    all_red_for: f64,
}

/// Lights sharing right of way, which change state together.
#[derive(Clone, Debug)]
pub struct PhaseGroup {
    lights: SmallVec<[TrafficLightId; 2]>,
    axis: Axis,
}

impl PhaseGroup {
    pub fn lights(&self) -> &[TrafficLightId] {
        &self.lights
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// The state of the group, taken from its first light.
    pub fn state(&self, lights: &LightSet) -> LightState {
        self.lights
            .first()
            .and_then(|id| lights.get(*id))
            .map(|l| l.state)
            .unwrap_or(LightState::Red)
    }

    fn timer(&self, lights: &LightSet) -> f64 {
        self.lights
            .iter()
            .filter_map(|id| lights.get(*id))
            .map(|l| l.timer)
            .fold(0.0, f64::max)
    }

    fn set_state(&self, lights: &mut LightSet, state: LightState) {
        for id in &self.lights {
            if let Some(light) = lights.get_mut(*id) {
                light.set_state(state);
            }
        }
    }

    /// Moves the group on to the next state of the cycle.
    fn advance(&self, lights: &mut LightSet) {
        let next = self.state(lights).next();
        self.set_state(lights, next);
    }
}

impl Intersection {
    /// Builds the lights of an intersection, inserting them into `lights`.
    /// Returns `None` if two or fewer streets meet at the location.
    pub(crate) fn build(
        location: LocationId,
        network: &Network,
        lights: &mut LightSet,
        timings: &LightTimings,
        rng: &mut impl Rng,
    ) -> Option<Self> {
        let streets = network.streets_at(location);
        if streets.len() <= 2 {
            return None;
        }
        let centre = network.location(location)?.pos();
        let bearings = streets
            .iter()
            .map(|s| network.bearing_from(location, *s))
            .collect::<Option<Vec<_>>>()?;

        let street_groups = group_bearings(&bearings, timings.pairing_tolerance);
        let num_groups = street_groups.len();
        let initial = street_groups
            .iter()
            .position(|g| g.axis == Axis::NorthSouth)
            .unwrap_or(0);

        let groups = street_groups
            .iter()
            .enumerate()
            .map(|(group_idx, group)| {
                let state = if group_idx == initial {
                    LightState::Green
                } else {
                    LightState::Red
                };
                let ids = group
                    .members
                    .iter()
                    .map(|&idx| {
                        let angle = bearings[idx];
                        let along = unit_vector(angle);
                        let pos = centre + timings.light_offset * (along - 0.5 * rot90(along));
                        let timer = rng.gen_range(0.0..timings.initial_jitter.max(f64::EPSILON));
                        lights.insert_with_key(|id| TrafficLight {
                            id,
                            location,
                            street: streets[idx],
                            state,
                            timer,
                            angle,
                            pos,
                            opposite_group: group_idx,
                            crossing_group: (group_idx + 1) % num_groups,
                        })
                    })
                    .collect();
                PhaseGroup {
                    lights: ids,
                    axis: group.axis,
                }
            })
            .collect();

        log::debug!(
            "built {} lights in {} phases at {:?}",
            streets.len(),
            num_groups,
            location
        );

        Some(Self {
            location,
            streets,
            groups,
            switch_target: None,
            since_evaluation: 0.0,
            all_red_for: 0.0,
        })
    }

    /// Removes this intersection's lights from `lights`.
    pub(crate) fn remove_lights(&self, lights: &mut LightSet) {
        for id in self.light_ids() {
            lights.remove(id);
        }
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    /// The phase groups, in the order they are served.
    pub fn groups(&self) -> &[PhaseGroup] {
        &self.groups
    }

    /// The phase an adaptive switch is heading towards, if one is in progress.
    pub fn switch_target(&self) -> Option<usize> {
        self.switch_target
    }

    /// How long every light has been red, in s.
    pub fn all_red_for(&self) -> f64 {
        self.all_red_for
    }

    /// Whether the lights were built for exactly this set of streets.
    pub(crate) fn serves(&self, streets: &[StreetId]) -> bool {
        self.streets.len() == streets.len() && streets.iter().all(|s| self.streets.contains(s))
    }

    pub fn light_ids(&self) -> impl Iterator<Item = TrafficLightId> + '_ {
        self.groups.iter().flat_map(|g| g.lights.iter().copied())
    }

    /// The light controlling traffic entering from `street`.
    pub fn light_for<'a>(
        &self,
        street: StreetId,
        lights: &'a LightSet,
    ) -> Option<&'a TrafficLight> {
        self.light_ids()
            .filter_map(|id| lights.get(id))
            .find(|l| l.street == street)
    }

    /// The streets sharing a phase with `street`, i.e. its oncoming traffic.
    pub fn opposing_streets(&self, street: StreetId, lights: &LightSet) -> SmallVec<[StreetId; 2]> {
        let Some(group) = self.light_for(street, lights).map(|l| l.opposite_group) else {
            return SmallVec::new();
        };
        self.groups[group]
            .lights
            .iter()
            .filter_map(|id| lights.get(*id))
            .map(|l| l.street)
            .filter(|s| *s != street)
            .collect()
    }

    fn group_state(&self, group: usize, lights: &LightSet) -> LightState {
        self.groups[group].state(lights)
    }

    /// Whether every group other than `except` is red.
    fn others_red(&self, except: usize, lights: &LightSet) -> bool {
        (0..self.groups.len())
            .filter(|g| *g != except)
            .all(|g| self.group_state(g, lights) == LightState::Red)
    }

    pub(super) fn all_red(&self, lights: &LightSet) -> bool {
        self.light_ids()
            .filter_map(|id| lights.get(id))
            .all(|l| l.state == LightState::Red)
    }

    fn advance_timers(&self, lights: &mut LightSet, dt: f64) {
        for id in self.light_ids() {
            if let Some(light) = lights.get_mut(id) {
                light.timer += dt;
            }
        }
    }

    /// Advances the fixed-timer cycle by `dt` seconds.
    pub(crate) fn step_fixed(&mut self, lights: &mut LightSet, dt: f64, timings: &LightTimings) {
        self.advance_timers(lights, dt);

        for idx in 0..self.groups.len() {
            let group = &self.groups[idx];
            let state = group.state(lights);
            let timer = group.timer(lights);
            let due = match state {
                LightState::Green => timer >= timings.green,
                LightState::Yellow => timer >= timings.yellow,
                LightState::Waiting => timer >= timings.waiting,
                LightState::Red => timer >= timings.red && self.others_red(idx, lights),
            };
            if due {
                group.advance(lights);
                if state == LightState::Yellow {
                    self.begin_next_phase(idx, lights);
                }
            }
        }
    }

    /// Moves the group served after `finished` from red to waiting.
    fn begin_next_phase(&self, finished: usize, lights: &mut LightSet) {
        let count = self.groups.len();
        let next = rotated_range(count, finished + 1)
            .find(|g| *g != finished)
            .unwrap_or(finished);
        if self.group_state(next, lights) == LightState::Red && self.others_red(next, lights) {
            self.groups[next].advance(lights);
        }
    }

    /// Advances the adaptive state machine by `dt` seconds. Green and red never time out.
    /// Returns `true` when the intersection is due for evaluation.
    pub(crate) fn step_adaptive(
        &mut self,
        lights: &mut LightSet,
        dt: f64,
        timings: &LightTimings,
        evaluation_interval: f64,
    ) -> bool {
        self.advance_timers(lights, dt);

        for idx in 0..self.groups.len() {
            let group = &self.groups[idx];
            let state = group.state(lights);
            let timer = group.timer(lights);
            match state {
                LightState::Yellow if timer >= timings.yellow => group.advance(lights),
                LightState::Waiting if timer >= timings.waiting => {
                    group.advance(lights);
                    if self.switch_target == Some(idx) {
                        self.switch_target = None;
                    }
                }
                _ => {}
            }
        }
        self.promote_target(lights);

        self.since_evaluation += dt;
        if self.since_evaluation >= evaluation_interval {
            self.since_evaluation = 0.0;
            true
        } else {
            false
        }
    }

    /// Moves the switch target to waiting once every conflicting light is red.
    fn promote_target(&self, lights: &mut LightSet) {
        let Some(target) = self.switch_target else {
            return;
        };
        if self.group_state(target, lights) == LightState::Red && self.others_red(target, lights) {
            self.groups[target].advance(lights);
        }
    }

    /// Carries out a decision of the adaptive controller.
    pub(crate) fn apply(&mut self, decision: Decision, lights: &mut LightSet) {
        match decision {
            Decision::Hold => {}
            Decision::Initialize(group) => {
                if self.all_red(lights) {
                    self.groups[group].set_state(lights, LightState::Green);
                }
            }
            Decision::Switch(group) => {
                for g in &self.groups {
                    if g.state(lights) == LightState::Green {
                        g.advance(lights);
                    }
                }
                self.switch_target = Some(group);
                self.promote_target(lights);
            }
            Decision::ForceSwitch(group) => {
                log::info!("all lights red at {:?}, forcing phase {}", self.location, group);
                self.switch_target = Some(group);
                self.promote_target(lights);
            }
        }
    }

    /// Corrects unsafe or stalled light states. Run after every batch update.
    ///
    /// * A four-way intersection never shows more than two greens.
    /// * If every light has been red for too long, the north-south phase turns green.
    pub(crate) fn validate(&mut self, lights: &mut LightSet, dt: f64, timings: &LightTimings) {
        if self.streets.len() == 4 {
            let greens = self
                .light_ids()
                .filter(|id| lights.get(*id).map(|l| l.state) == Some(LightState::Green))
                .collect::<SmallVec<[_; 4]>>();
            if greens.len() > MAX_GREEN_FOUR_WAY {
                log::warn!("too many green lights at {:?}", self.location);
                for id in &greens[MAX_GREEN_FOUR_WAY..] {
                    if let Some(light) = lights.get_mut(*id) {
                        light.set_state(LightState::Red);
                    }
                }
            }
        }

        if self.all_red(lights) {
            self.all_red_for += dt;
        } else {
            self.all_red_for = 0.0;
        }

        if self.all_red_for > timings.all_red_limit {
            let group = self
                .groups
                .iter()
                .position(|g| g.axis == Axis::NorthSouth)
                .unwrap_or(0);
            log::warn!("lights stalled at {:?}, forcing phase {}", self.location, group);
            self.groups[group].set_state(lights, LightState::Green);
            self.switch_target = None;
            self.all_red_for = 0.0;
        }
    }
}
