//! Aggregate performance statistics of a simulation panel.

/// Converts speed per unit of travel time into km/h for display.
pub const SPEED_MULTIPLIER: f64 = 3.6;

/// The statistics of a single vehicle which feed the panel metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleStats {
    /// The number of times the vehicle was brought to a halt by traffic.
    pub stops: u32,
    /// Total time spent stopped, in s.
    pub time_not_moving: f64,
    pub total_distance: f64,
    pub streets_traveled: u32,
    /// Time spent on completed streets, in s.
    pub total_travel_time: f64,
}

/// Running totals of vehicle statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatsTotals {
    pub vehicles: usize,
    pub stops: u64,
    pub time_not_moving: f64,
    pub total_distance: f64,
    pub streets_traveled: u64,
    pub total_travel_time: f64,
}

/// The headline figures compared between the two panels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PanelMetrics {
    /// Vehicles currently in the simulation.
    pub vehicles: usize,
    pub trips_completed: u32,
    /// The mean number of stops over every vehicle counted.
    pub stops_per_vehicle: f64,
    /// Total time spent stopped by every vehicle counted, in s.
    pub time_waiting: f64,
    pub average_speed: f64,
    /// Mean time to travel one street, in s.
    pub average_travel_time: f64,
}

impl StatsTotals {
    pub fn add(&mut self, stats: &VehicleStats) {
        self.vehicles += 1;
        self.stops += stats.stops as u64;
        self.time_not_moving += stats.time_not_moving;
        self.total_distance += stats.total_distance;
        self.streets_traveled += stats.streets_traveled as u64;
        self.total_travel_time += stats.total_travel_time;
    }
}

impl<'a> FromIterator<&'a VehicleStats> for StatsTotals {
    fn from_iter<I: IntoIterator<Item = &'a VehicleStats>>(iter: I) -> Self {
        let mut totals = Self::default();
        for stats in iter {
            totals.add(stats);
        }
        totals
    }
}

impl PanelMetrics {
    /// Computes the metrics from totals over active and retired vehicles.
    pub fn from_totals(totals: &StatsTotals, active: usize, trips_completed: u32) -> Self {
        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
        Self {
            vehicles: active,
            trips_completed,
            stops_per_vehicle: ratio(totals.stops as f64, totals.vehicles as f64),
            time_waiting: totals.time_not_moving,
            average_speed: ratio(totals.total_distance, totals.total_travel_time)
                * SPEED_MULTIPLIER,
            average_travel_time: ratio(totals.total_travel_time, totals.streets_traveled as f64),
        }
    }

    /// Computes the metrics of a set of vehicles.
    pub fn from_stats<'a>(
        stats: impl IntoIterator<Item = &'a VehicleStats>,
        trips_completed: u32,
    ) -> Self {
        let totals = stats.into_iter().collect::<StatsTotals>();
        Self::from_totals(&totals, totals.vehicles, trips_completed)
    }
}
