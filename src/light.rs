use crate::math::Point2d;
use crate::{LocationId, StreetId, TrafficLightId};
pub use adaptive::Decision;
pub use grouping::Axis;
pub use intersection::{Intersection, PhaseGroup};

mod adaptive;
mod grouping;
mod intersection;

/// The state of a traffic light.
///
/// Lights cycle `Red → Waiting → Green → Yellow → Red`. `Waiting` is a short buffer
/// before turning green, entered once the conflicting phase has gone fully red.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LightState {
    Red,
    Yellow,
    Green,
    Waiting,
}

/// How the traffic lights of a simulation are controlled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlMode {
    /// Every phase is green, yellow and red for fixed durations.
    FixedTimer,
    /// Phases switch when approaching traffic favours another phase.
    Adaptive,
}

/// A traffic light controlling the entry of one street into an intersection.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrafficLight {
    id: TrafficLightId,
    location: LocationId,
    street: StreetId,
    state: LightState,
    /// Time spent in the current state, in s.
    timer: f64,
    /// The bearing from the intersection along the street.
    angle: f64,
    pos: Point2d,
    opposite_group: usize,
    crossing_group: usize,
}

impl LightState {
    /// The state which follows this one in the cycle.
    pub fn next(self) -> Self {
        match self {
            Self::Red => Self::Waiting,
            Self::Waiting => Self::Green,
            Self::Green => Self::Yellow,
            Self::Yellow => Self::Red,
        }
    }

    /// Whether the light shows anything other than red.
    pub fn is_active(self) -> bool {
        self != Self::Red
    }
}

impl TrafficLight {
    pub fn id(&self) -> TrafficLightId {
        self.id
    }

    /// The intersection the light belongs to.
    pub fn location(&self) -> LocationId {
        self.location
    }

    /// The street whose traffic the light controls.
    pub fn street(&self) -> StreetId {
        self.street
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    /// Time spent in the current state, in s.
    pub fn timer(&self) -> f64 {
        self.timer
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Where the light stands, in world coordinates.
    pub fn pos(&self) -> Point2d {
        self.pos
    }

    /// The phase group of lights sharing right of way with this one.
    pub fn opposite_group(&self) -> usize {
        self.opposite_group
    }

    /// The phase group which is served after this light's group.
    pub fn crossing_group(&self) -> usize {
        self.crossing_group
    }

    pub(crate) fn set_state(&mut self, state: LightState) {
        self.state = state;
        self.timer = 0.0;
    }
}
