//! RS274/NGC modal groups and per-block legality checks (NIST RS274/NGC v3, 3.4).

use serde::{Deserialize, Serialize};

use crate::error::{CmError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModalGroup {
    NonModal = 0,     // G4, G10, G28.x, G30.x, G53, G92.x
    Motion,           // G0, G1, G2, G3, G38.2, G80
    Plane,            // G17, G18, G19
    Distance,         // G90, G91
    FeedRateMode,     // G93, G94
    Units,            // G20, G21
    CutterRadiusComp, // G40
    ToolLengthOffset, // G43, G49
    ReturnMode,       // G98, G99
    CoordSystem,      // G54..G59
    PathControl,      // G61, G61.1, G64
    Stopping,         // M0, M1, M2, M30, M60
    ToolChange,       // M6
    Spindle,          // M3, M4, M5
    Coolant,          // M7, M8, M9
    OverrideSwitches, // M48, M49, M50.x, M51.x
}

pub const MODAL_GROUP_COUNT: usize = 16;

/// G and M codes the canonical machine accepts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    G0, G1, G2, G3, G38_2, G80,
    G4, G10, G28, G28_1, G28_2, G28_3, G28_4, G30, G30_1, G53, G92, G92_1, G92_2, G92_3,
    G17, G18, G19,
    G20, G21,
    G40,
    G43, G49,
    G54, G55, G56, G57, G58, G59,
    G61, G61_1, G64,
    G90, G91,
    G93, G94,
    G98, G99,
    M0, M1, M2, M30, M60,
    M3, M4, M5,
    M6,
    M7, M8, M9,
    M48, M49, M50, M50_1, M50_2, M50_3, M51, M51_1,
}

impl Code {
    pub fn group(self) -> ModalGroup {
        use Code::*;
        match self {
            G0 | G1 | G2 | G3 | G38_2 | G80 => ModalGroup::Motion,
            G4 | G10 | G28 | G28_1 | G28_2 | G28_3 | G28_4 | G30 | G30_1 | G53 | G92 | G92_1 | G92_2
            | G92_3 => ModalGroup::NonModal,
            G17 | G18 | G19 => ModalGroup::Plane,
            G20 | G21 => ModalGroup::Units,
            G40 => ModalGroup::CutterRadiusComp,
            G43 | G49 => ModalGroup::ToolLengthOffset,
            G54 | G55 | G56 | G57 | G58 | G59 => ModalGroup::CoordSystem,
            G61 | G61_1 | G64 => ModalGroup::PathControl,
            G90 | G91 => ModalGroup::Distance,
            G93 | G94 => ModalGroup::FeedRateMode,
            G98 | G99 => ModalGroup::ReturnMode,
            M0 | M1 | M2 | M30 | M60 => ModalGroup::Stopping,
            M3 | M4 | M5 => ModalGroup::Spindle,
            M6 => ModalGroup::ToolChange,
            M7 | M8 | M9 => ModalGroup::Coolant,
            M48 | M49 | M50 | M50_1 | M50_2 | M50_3 | M51 | M51_1 => ModalGroup::OverrideSwitches,
        }
    }
}

/// Reject a block that asserts more than one code from the same group.
/// Mist and flood (M7, M8) may be switched on together.
pub fn validate(codes: &[Code]) -> Result<()> {
    let mut seen: [Option<Code>; MODAL_GROUP_COUNT] = [None; MODAL_GROUP_COUNT];
    for &code in codes {
        let slot = &mut seen[code.group() as usize];
        match *slot {
            None => *slot = Some(code),
            Some(Code::M7) if code == Code::M8 => {}
            Some(Code::M8) if code == Code::M7 => {}
            Some(_) => return Err(CmError::ModalGroupViolation(code.group())),
        }
    }
    Ok(())
}
