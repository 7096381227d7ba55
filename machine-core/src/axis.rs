use serde::{Deserialize, Serialize};

pub const AXES: usize = 6;

/// Machine axes in canonical order. X, Y, Z are linear; A, B, C are rotary.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis { X, Y, Z, A, B, C }

impl Axis {
    pub const ALL: [Axis; AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Axis> {
        Axis::ALL.get(idx).copied()
    }

    pub fn is_rotary(self) -> bool {
        matches!(self, Axis::A | Axis::B | Axis::C)
    }

    pub fn as_char(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::A => 'a',
            Axis::B => 'b',
            Axis::C => 'c',
        }
    }

    pub fn from_char(c: char) -> Option<Axis> {
        match c.to_ascii_lowercase() {
            'x' => Some(Axis::X),
            'y' => Some(Axis::Y),
            'z' => Some(Axis::Z),
            'a' => Some(Axis::A),
            'b' => Some(Axis::B),
            'c' => Some(Axis::C),
            _ => None,
        }
    }
}

/// How an axis takes part in coordinated motion.
///
/// Variants are declared in ordinal order Disabled < Standard < Inhibited <
/// Radius and the numeric values are exposed through the keyed accessors, so
/// the order must not change. Code never compares ordinals; use the
/// predicates below.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum AxisMode {
    /// Axis is killed: no target, no timing.
    Disabled = 0,
    /// Coordinated motion with standard behaviour.
    #[default]
    Standard = 1,
    /// Target is computed but the axis does not constrain move time.
    Inhibited = 2,
    /// Rotary axis programmed in linear units through its radius.
    Radius = 3,
}

impl AxisMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Standard),
            2 => Some(Self::Inhibited),
            3 => Some(Self::Radius),
            _ => None,
        }
    }

    /// The axis takes a target and moves.
    pub fn is_active(self) -> bool {
        self != AxisMode::Disabled
    }

    /// The axis' own time is computed by the timing solver.
    pub fn is_timed(self) -> bool {
        self.is_active()
    }

    /// The axis' time is weighted into the move-time maximum.
    pub fn limits_move_time(self) -> bool {
        matches!(self, AxisMode::Standard | AxisMode::Radius)
    }
}
