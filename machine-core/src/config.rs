use serde::{Deserialize, Serialize};

use crate::axis::{Axis, AxisMode, AXES};
use crate::gcode::{CoordSystem, DistanceMode, PathControl, Plane, UnitsMode};

/// Per-axis limits and homing settings. Lengths in mm (degrees for rotary axes),
/// velocities in mm/min, jerk in mm/min^3 divided by 1,000,000. A rotary axis
/// in Radius mode is timed by its surface travel, so its velocity and jerk
/// limits are mm/min of surface speed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub axis_mode: AxisMode,
    pub feedrate_max: f64,
    pub velocity_max: f64,
    pub travel_min: f64,
    pub travel_max: f64,
    pub jerk_max: f64,
    pub jerk_homing: f64,
    pub junction_dev: f64,
    pub radius: f64,
    // sign of search_velocity picks the switch; 0 disables homing for the axis
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
    pub zero_backoff: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self::linear()
    }
}

impl AxisConfig {
    pub fn linear() -> Self {
        Self {
            axis_mode: AxisMode::Standard,
            feedrate_max: 12_000.0,
            velocity_max: 16_000.0,
            travel_min: 0.0,
            travel_max: 300.0,
            jerk_max: 5_000.0,
            jerk_homing: 10_000.0,
            junction_dev: 0.05,
            radius: 0.0,
            search_velocity: -2_000.0,
            latch_velocity: 100.0,
            latch_backoff: 5.0,
            zero_backoff: 1.0,
        }
    }

    pub fn rotary() -> Self {
        Self {
            axis_mode: AxisMode::Standard,
            feedrate_max: 36_000.0,
            velocity_max: 36_000.0,
            travel_min: -1.0,
            travel_max: -1.0,
            jerk_max: 20_000.0,
            jerk_homing: 20_000.0,
            junction_dev: 0.05,
            radius: 1.0,
            search_velocity: 0.0,
            latch_velocity: 0.0,
            latch_backoff: 0.0,
            zero_backoff: 0.0,
        }
    }

    pub fn homing_enabled(&self) -> bool {
        self.search_velocity != 0.0 && self.latch_velocity > 0.0
    }

    /// Travel span used as the homing search distance.
    pub fn travel_span(&self) -> f64 {
        (self.travel_max - self.travel_min).abs()
    }
}

/// Machine-wide configuration. Owned by the canonical machine; changed at
/// runtime only through the keyed accessors.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    pub junction_acceleration: f64,
    pub chordal_tolerance: f64,
    pub min_segment_len: f64,
    pub arc_segment_len: f64,
    pub estd_segment_usec: f64,
    pub soft_limit_enable: bool,

    // power-on defaults, distinct from the live model values
    pub coord_system: CoordSystem,
    pub select_plane: Plane,
    pub units_mode: UnitsMode,
    pub path_control: PathControl,
    pub distance_mode: DistanceMode,

    pub axes: [AxisConfig; AXES],
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            junction_acceleration: 100_000.0,
            chordal_tolerance: 0.01,
            min_segment_len: 0.05,
            arc_segment_len: 0.1,
            estd_segment_usec: 5_000.0,
            soft_limit_enable: false,
            coord_system: CoordSystem::G54,
            select_plane: Plane::XY,
            units_mode: UnitsMode::Millimeters,
            path_control: PathControl::Continuous,
            distance_mode: DistanceMode::Absolute,
            axes: [
                AxisConfig::linear(),
                AxisConfig::linear(),
                AxisConfig { travel_max: 100.0, search_velocity: -1_000.0, ..AxisConfig::linear() },
                AxisConfig::rotary(),
                AxisConfig::rotary(),
                AxisConfig::rotary(),
            ],
        }
    }
}

impl MachineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        &self.axes[axis.index()]
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisConfig {
        &mut self.axes[axis.index()]
    }
}
