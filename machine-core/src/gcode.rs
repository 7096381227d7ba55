//! Canonical G-code state containers.
//!
//! `GCodeState` is the part of the model that travels with every block: the
//! machine keeps the model instance, each queued planner block carries its own
//! copy, and the runtime owns a further copy for the block it is executing.
//! Values are normalized: lengths in mm, positions in machine coordinates.
//! `GCodeStateExtended` holds what only the canonical machine needs.

use serde::{Deserialize, Serialize};

use crate::axis::AXES;
use crate::overrides::Overrides;

pub const MM_PER_INCH: f64 = 25.4;

/// Number of work coordinate systems (G54..G59). Offset tables hold one extra
/// row for machine coordinates.
pub const COORDS: usize = 6;

/// G modal group 1.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MotionMode {
    #[default]
    StraightTraverse = 0, // G0
    StraightFeed,         // G1
    CwArc,                // G2
    CcwArc,               // G3
    CancelMotionMode,     // G80
    StraightProbe,        // G38.2
}

impl MotionMode {
    pub fn is_feed(self) -> bool {
        matches!(self, MotionMode::StraightFeed | MotionMode::CwArc | MotionMode::CcwArc | MotionMode::StraightProbe)
    }
}

/// Non-modal action carried by the current block only. Distinct from
/// `MotionMode`, which persists.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NextAction {
    #[default]
    Default = 0,        // run the motion mode
    SearchHome,         // G28.2
    SetAbsoluteOrigin,  // G28.3
    HomingNoSet,        // G28.4
    SetG28Position,     // G28.1
    GotoG28Position,    // G28
    SetG30Position,     // G30.1
    GotoG30Position,    // G30
    SetCoordData,       // G10
    SetOriginOffsets,   // G92
    ResetOriginOffsets, // G92.1
    SuspendOriginOffsets, // G92.2
    ResumeOriginOffsets,  // G92.3
    Dwell,              // G4
    StraightProbe,      // G38.2
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProgramFlow {
    #[default]
    Running = 0,
    Stop,
    End,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Plane {
    #[default]
    XY = 0, // G17
    XZ,     // G18
    YZ,     // G19
}

impl Plane {
    /// Axis indices (axis_0, axis_1, axis_2) for the plane.
    pub fn axes(self) -> [usize; 3] {
        match self {
            Plane::XY => [0, 1, 2],
            Plane::XZ => [0, 2, 1],
            Plane::YZ => [1, 2, 0],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum UnitsMode {
    Inches = 0, // G20
    #[default]
    Millimeters, // G21
}

impl UnitsMode {
    pub fn to_millimeters(self, value: f64) -> f64 {
        match self {
            UnitsMode::Inches => value * MM_PER_INCH,
            UnitsMode::Millimeters => value,
        }
    }

    pub fn from_millimeters(self, value: f64) -> f64 {
        match self {
            UnitsMode::Inches => value / MM_PER_INCH,
            UnitsMode::Millimeters => value,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CoordSystem {
    Absolute = 0, // machine coordinates
    #[default]
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
}

impl CoordSystem {
    pub const ALL: [CoordSystem; COORDS + 1] = [
        CoordSystem::Absolute,
        CoordSystem::G54,
        CoordSystem::G55,
        CoordSystem::G56,
        CoordSystem::G57,
        CoordSystem::G58,
        CoordSystem::G59,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        CoordSystem::ALL.get(idx).copied()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PathControl {
    ExactPath = 0, // G61
    ExactStop,     // G61.1
    #[default]
    Continuous,    // G64
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DistanceMode {
    #[default]
    Absolute = 0, // G90
    Incremental,  // G91
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SpindleMode {
    #[default]
    Off = 0, // M5
    Cw,      // M3
    Ccw,     // M4
}

/// Canonical block state shared by model, planner and runtime stages.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct GCodeState {
    pub linenum: u32,
    pub motion_mode: MotionMode,
    pub target: [f64; AXES],
    // cached for reporting; see CanonicalMachine::set_work_offsets
    pub work_offset: [f64; AXES],

    pub move_time: f64,    // minutes, optimal for the axis constraints
    pub minimum_time: f64, // minutes
    pub feed_rate: f64,    // mm/min
    pub spindle_speed: f64,
    pub parameter: f64,    // P word: dwell seconds, G10 coordinate select...

    pub inverse_feed_rate_mode: bool,
    pub select_plane: Plane,
    pub units_mode: UnitsMode,
    pub coord_system: CoordSystem,
    pub absolute_override: bool,
    pub path_control: PathControl,
    pub distance_mode: DistanceMode,
    pub tool: u8,
    pub tool_select: u8,
    pub mist_coolant: bool,
    pub flood_coolant: bool,
    pub spindle_mode: SpindleMode,
}

/// Model extensions used by the canonical machine and arc handling only.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GCodeStateExtended {
    pub next_action: NextAction,
    pub program_flow: ProgramFlow,

    pub position: [f64; AXES],      // model position, machine coordinates
    pub origin_offset: [f64; AXES], // G92
    pub origin_offset_enable: bool,
    pub g28_position: [f64; AXES],
    pub g30_position: [f64; AXES],

    pub overrides: Overrides,
    pub inverse_feed_rate: f64,
    pub l_word: u8,

    pub plane_axis_0: usize,
    pub plane_axis_1: usize,
    pub plane_axis_2: usize,
    pub block_delete_switch: bool,

    pub arc_radius: f64,
    pub arc_offset: [f64; 3],
}

impl Default for GCodeStateExtended {
    fn default() -> Self {
        let [a0, a1, a2] = Plane::XY.axes();
        Self {
            next_action: NextAction::Default,
            program_flow: ProgramFlow::Running,
            position: [0.0; AXES],
            origin_offset: [0.0; AXES],
            origin_offset_enable: false,
            g28_position: [0.0; AXES],
            g30_position: [0.0; AXES],
            overrides: Overrides::default(),
            inverse_feed_rate: 0.0,
            l_word: 0,
            plane_axis_0: a0,
            plane_axis_1: a1,
            plane_axis_2: a2,
            block_delete_switch: true,
            arc_radius: 0.0,
            arc_offset: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inch_conversion_is_symmetric() {
        let mm = UnitsMode::Inches.to_millimeters(2.0);
        assert!((mm - 50.8).abs() < 1e-9);
        assert!((UnitsMode::Inches.from_millimeters(mm) - 2.0).abs() < 1e-9);
        assert_eq!(UnitsMode::Millimeters.to_millimeters(3.5), 3.5);
    }

    #[test]
    fn plane_axes_follow_rs274() {
        assert_eq!(Plane::XY.axes(), [0, 1, 2]);
        assert_eq!(Plane::XZ.axes(), [0, 2, 1]);
        assert_eq!(Plane::YZ.axes(), [1, 2, 0]);
    }

    #[test]
    fn state_copies_do_not_alias() {
        let mut model = GCodeState::default();
        let planned = model;
        model.target[0] = 12.0;
        assert_eq!(planned.target[0], 0.0);
    }
}
