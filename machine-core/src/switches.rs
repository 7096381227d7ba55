use crate::axis::{Axis, AXES};

/// Switch inputs sampled by the homing and probing cycles once per control
/// loop iteration.
pub trait SwitchInputs {
    fn homing_switch(&self, axis: Axis) -> bool;
    fn probe_switch(&self) -> bool;
}

/// Plain switch image, filled in by whoever reads the pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchBank {
    pub homing: [bool; AXES],
    pub probe: bool,
}

impl SwitchBank {
    pub fn set_homing(&mut self, axis: Axis, closed: bool) {
        self.homing[axis.index()] = closed;
    }
}

impl SwitchInputs for SwitchBank {
    fn homing_switch(&self, axis: Axis) -> bool {
        self.homing[axis.index()]
    }

    fn probe_switch(&self) -> bool {
        self.probe
    }
}
