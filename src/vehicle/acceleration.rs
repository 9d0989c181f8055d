use crate::config::VehicleParams;
use std::cell::Cell;

/// How hard a vehicle brakes when slowing to its target speed.
/// Ordered by urgency; the most urgent need wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Braking {
    /// Slowing for an upcoming turn.
    Turn,
    Normal,
    /// Braking hard to avoid a collision.
    Emergency,
}

/// The acceleration model of a vehicle.
///
/// Each step the model is reset to the vehicle's preferred speed, then every rule
/// which applies to the vehicle lowers the target speed through [`limit`](Self::limit).
#[derive(Clone, Debug)]
pub struct AccelerationModel {
    acc: f64,
    dec: f64,
    emergency_dec: f64,
    turn_dec: f64,
    target: Cell<f64>,
    braking: Cell<Option<Braking>>,
}

impl AccelerationModel {
    /// Creates a new acceleration model.
    pub fn new(params: &VehicleParams) -> Self {
        Self {
            acc: params.acceleration,
            dec: params.deceleration,
            emergency_dec: params.emergency_deceleration,
            turn_dec: params.turn_deceleration,
            target: Cell::new(params.preferred_speed),
            braking: Cell::new(None),
        }
    }

    /// Resets the model. Use at the start of an update.
    pub fn reset(&self, preferred_speed: f64) {
        self.target.set(preferred_speed);
        self.braking.set(None);
    }

    /// The current target speed.
    pub fn target(&self) -> f64 {
        self.target.get()
    }

    #[cfg(test)]
    pub fn braking(&self) -> Option<Braking> {
        self.braking.get()
    }

    /// Lowers the target speed to at most `speed`.
    pub fn limit(&self, speed: f64, braking: Braking) {
        let speed = speed.max(0.0);
        if speed < self.target.get() {
            self.target.set(speed);
        }
        self.braking.set(self.braking.get().max(Some(braking)));
    }

    /// The deceleration used to reach the target speed, in units/s<sup>2</sup>.
    pub fn deceleration(&self) -> f64 {
        match self.braking.get() {
            Some(Braking::Emergency) => self.emergency_dec,
            Some(Braking::Turn) => self.turn_dec,
            Some(Braking::Normal) | None => self.dec,
        }
    }

    /// Moves `speed` towards the target speed over `dt` seconds.
    pub fn approach(&self, speed: f64, dt: f64) -> f64 {
        let target = self.target.get();
        if speed < target {
            f64::min(speed + self.acc * dt, target)
        } else {
            f64::max(speed - self.deceleration() * dt, target)
        }
    }

    /// The distance travelled while braking from `speed` to a standstill,
    /// in units of speed × s.
    pub fn stopping_distance(&self, speed: f64, braking: Braking) -> f64 {
        let dec = match braking {
            Braking::Emergency => self.emergency_dec,
            Braking::Turn => self.turn_dec,
            Braking::Normal => self.dec,
        };
        0.5 * speed * speed / dec
    }
}
