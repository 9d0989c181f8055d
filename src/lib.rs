pub use cgmath;
pub use comparison::{Comparison, ComparisonMetrics, MAX_STEP};
pub use config::{AdaptiveParams, LightTimings, SimulationConfig, VehicleParams};
pub use error::{NetworkError, SpawnError};
pub use light::{Axis, ControlMode, Decision, Intersection, LightState, PhaseGroup, TrafficLight};
pub use metrics::{PanelMetrics, VehicleStats};
pub use network::{Direction, Location, LocationKind, Network, Street};
pub use routing::{find_best_next_street, RouteChoice, RoutingCache, Turn, VehicleGroupId};
pub use simulation::{Simulation, SpawnRequest};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::Interval;
pub use vehicle::{StopCause, Vehicle, ENTRY_OFFSET, STOP_SPEED};

mod comparison;
mod config;
mod debug;
mod error;
mod light;
pub mod math;
mod metrics;
mod network;
mod routing;
mod simulation;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Location].
    pub struct LocationId;
    /// Unique ID of a [Street].
    pub struct StreetId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

type LightSet = SlotMap<TrafficLightId, TrafficLight>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
