use serde::Serialize;
use wasm_bindgen::prelude::*;

// --- LOGGING ---
#[doc(hidden)]
pub fn console_write(s: &str) {
    #[cfg(target_arch = "wasm32")]
    web_sys::console::log_1(&JsValue::from_str(s));
    #[cfg(not(target_arch = "wasm32"))]
    log::info!("{s}");
}

macro_rules! console_log {
    ($($t:tt)*) => ($crate::console_write(&format!($($t)*)))
}

pub mod axis;
pub mod block;
pub mod config;
pub mod error;
pub mod gcode;
pub mod homing;
pub mod keyed;
pub mod machine;
pub mod modal;
pub mod motion;
pub mod offsets;
pub mod overrides;
pub mod planner;
pub mod probing;
pub mod sequencer;
pub mod state;
pub mod switches;
pub mod timing;

pub use axis::{Axis, AxisMode, AXES};
pub use block::Block;
pub use config::{AxisConfig, MachineConfig};
pub use error::{CmError, Fault, Result};
pub use gcode::{GCodeState, GCodeStateExtended};
pub use keyed::Value;
pub use machine::{CanonicalMachine, View};
pub use modal::Code;
pub use planner::{MotionPlanner, QueuePlanner, RuntimeEvent};
pub use probing::ProbeResult;
pub use sequencer::RequestHandle;
pub use state::{CombinedState, CycleState, HoldState, HomingState, MachineState, MotionState};
pub use switches::{SwitchBank, SwitchInputs};

use gcode::{CoordSystem, MotionMode, SpindleMode, UnitsMode};
use overrides::Overrides;

/// Everything a host UI shows, in one serializable snapshot.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatusReport {
    pub combined: CombinedState,
    pub machine: MachineState,
    pub cycle: CycleState,
    pub motion: MotionState,
    pub hold: HoldState,
    pub homing: HomingState,
    pub homed: [bool; AXES],
    pub line: u32,
    pub units: UnitsMode,
    pub coord_system: CoordSystem,
    pub motion_mode: MotionMode,
    pub feed_rate: f64,
    pub velocity: f64,
    pub spindle_mode: SpindleMode,
    pub spindle_speed: f64,
    pub tool: u8,
    pub mist_coolant: bool,
    pub flood_coolant: bool,
    pub overrides: Overrides,
    /// Work coordinates in the reported units.
    pub position: [f64; AXES],
    pub machine_position: [f64; AXES],
    pub probe: Option<ProbeResult>,
}

/// JavaScript-facing wrapper around the canonical machine and the reference
/// planner. The host drives it with `tick` from its animation loop.
#[wasm_bindgen]
pub struct MachineController {
    cm: CanonicalMachine<QueuePlanner>,
    switches: SwitchBank,
}

impl Default for MachineController {
    fn default() -> Self {
        Self::new()
    }
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
impl MachineController {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self { cm: CanonicalMachine::new(MachineConfig::default(), QueuePlanner::new()), switches: SwitchBank::default() }
    }

    /// Replace the configuration from JSON. Missing fields keep their defaults.
    pub fn configure(&mut self, json: &str) -> std::result::Result<(), JsValue> {
        self.apply_config(json).map_err(js_error)
    }

    pub fn execute(&mut self, block: JsValue) -> std::result::Result<(), JsValue> {
        let block: Block = serde_wasm_bindgen::from_value(block)?;
        self.cm.execute_block(&block).map_err(js_error)
    }

    pub fn feedhold(&self) {
        self.cm.request_feedhold();
    }

    pub fn queue_flush(&self) {
        self.cm.request_queue_flush();
    }

    pub fn cycle_start(&self) {
        self.cm.request_cycle_start();
    }

    pub fn set_homing_switch(&mut self, axis: u8, closed: bool) {
        if let Some(axis) = Axis::from_index(axis as usize) {
            self.switches.set_homing(axis, closed);
        }
    }

    pub fn set_probe(&mut self, closed: bool) {
        self.switches.probe = closed;
    }

    /// Advance the runtime by `dt_ms` and run one control loop pass. Returns
    /// false when the pass raised an error; faults have already alarmed.
    pub fn tick(&mut self, dt_ms: f64) -> bool {
        self.cm.planner_mut().tick(dt_ms);
        match self.cm.control_loop(&self.switches) {
            Ok(()) => true,
            Err(err) => {
                console_log!("control loop: {err}");
                false
            }
        }
    }

    pub fn get_full_state(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.status_report()).unwrap_or(JsValue::NULL)
    }

    pub fn get_value(&self, key: &str) -> JsValue {
        match self.cm.get(key) {
            Some(value) => serde_wasm_bindgen::to_value(&value).unwrap_or(JsValue::NULL),
            None => JsValue::UNDEFINED,
        }
    }

    pub fn set_value(&mut self, key: &str, value: f64) -> std::result::Result<(), JsValue> {
        self.cm.set(key, Value::Float(value)).map_err(js_error)
    }

    /// E-stop from the host.
    pub fn alarm(&mut self) {
        self.cm.alarm(Fault::ExternalAlarm);
    }

    pub fn reset(&mut self) {
        self.cm.reset();
    }
}

impl MachineController {
    pub fn machine(&self) -> &CanonicalMachine<QueuePlanner> {
        &self.cm
    }

    pub fn machine_mut(&mut self) -> &mut CanonicalMachine<QueuePlanner> {
        &mut self.cm
    }

    pub fn switches_mut(&mut self) -> &mut SwitchBank {
        &mut self.switches
    }

    fn apply_config(&mut self, json: &str) -> std::result::Result<(), String> {
        if self.cm.status().in_cycle() {
            return Err("configuration is locked while a cycle runs".to_string());
        }
        let config = MachineConfig::from_json(json).map_err(|e| e.to_string())?;
        *self.cm.config_mut() = config;
        Ok(())
    }

    pub fn status_report(&self) -> StatusReport {
        let view = self.cm.active_view();
        let gm = self.cm.state(view);
        StatusReport {
            combined: self.cm.combined_state(),
            machine: self.cm.machine_state(),
            cycle: self.cm.cycle_state(),
            motion: self.cm.motion_state(),
            hold: self.cm.hold_state(),
            homing: self.cm.homing_state(),
            homed: Axis::ALL.map(|a| self.cm.is_homed(a)),
            line: gm.linenum,
            units: gm.units_mode,
            coord_system: gm.coord_system,
            motion_mode: gm.motion_mode,
            feed_rate: gm.units_mode.from_millimeters(gm.feed_rate),
            velocity: gm.units_mode.from_millimeters(self.cm.planner().runtime_velocity()),
            spindle_mode: gm.spindle_mode,
            spindle_speed: self.cm.effective_spindle_speed(view),
            tool: gm.tool,
            mist_coolant: gm.mist_coolant,
            flood_coolant: gm.flood_coolant,
            overrides: self.cm.extended().overrides,
            position: Axis::ALL.map(|a| self.cm.work_position(view, a)),
            machine_position: Axis::ALL.map(|a| self.cm.absolute_position(view, a)),
            probe: self.cm.probe_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::approx_eq;

    #[test]
    fn tick_runs_a_program_to_completion() {
        let mut mc = MachineController::new();
        let cm = mc.machine_mut();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0).line(1)).unwrap();
        cm.execute_block(&Block::new().code(Code::M2)).unwrap();
        assert_eq!(mc.status_report().combined, CombinedState::Run);

        for _ in 0..200 {
            assert!(mc.tick(10.0));
        }
        let report = mc.status_report();
        assert_eq!(report.combined, CombinedState::ProgramEnd);
        approx_eq(report.machine_position[0], 10.0);
        assert_eq!(report.motion_mode, MotionMode::CancelMotionMode);
    }

    #[test]
    fn feedhold_through_the_controller() {
        let mut mc = MachineController::new();
        mc.machine_mut().execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0)).unwrap();
        mc.tick(100.0);
        mc.feedhold();
        for _ in 0..10 {
            mc.tick(10.0);
        }
        assert_eq!(mc.status_report().combined, CombinedState::Hold);
        let held = mc.status_report().machine_position[0];
        mc.tick(100.0);
        approx_eq(mc.status_report().machine_position[0], held);

        mc.cycle_start();
        for _ in 0..200 {
            mc.tick(10.0);
        }
        assert_eq!(mc.status_report().combined, CombinedState::Ready);
        approx_eq(mc.status_report().machine_position[0], 10.0);
    }

    #[test]
    fn homing_driven_by_switch_inputs() {
        let mut mc = MachineController::new();
        for axis in [Axis::Y, Axis::A, Axis::B, Axis::C] {
            mc.machine_mut().config_mut().axis_mut(axis).search_velocity = 0.0;
        }
        mc.machine_mut().config_mut().axis_mut(Axis::X).latch_velocity = 600.0;
        mc.machine_mut().config_mut().axis_mut(Axis::Z).latch_velocity = 600.0;
        mc.machine_mut()
            .execute_block(&Block::new().code(Code::G28_2).axis(Axis::X, 0.0).axis(Axis::Z, 0.0))
            .unwrap();
        assert_eq!(mc.status_report().combined, CombinedState::Homing);

        for _ in 0..100_000 {
            let x = mc.machine().absolute_position(View::Runtime, Axis::X);
            let z = mc.machine().absolute_position(View::Runtime, Axis::Z);
            mc.set_homing_switch(0, x <= -50.0);
            mc.set_homing_switch(2, z <= -20.0);
            assert!(mc.tick(10.0));
            if mc.machine().homing_cycle().is_none() {
                break;
            }
        }
        let report = mc.status_report();
        assert_eq!(report.combined, CombinedState::Ready);
        assert_eq!(report.homing, HomingState::Homed);
        assert!(report.homed[0] && report.homed[2]);
        approx_eq(report.machine_position[0], 0.0);
    }

    #[test]
    fn keyed_settings_and_config_json() {
        let mut mc = MachineController::new();
        mc.apply_config(r#"{ "soft_limit_enable": true }"#).unwrap();
        assert_eq!(mc.machine().get("sl"), Some(Value::Bool(true)));
        mc.machine_mut().set("xvm", Value::Float(1_000.0)).unwrap();
        approx_eq(mc.machine().config().axis(Axis::X).velocity_max, 1_000.0);
        assert!(mc.apply_config("not json").is_err());
    }

    #[test]
    fn host_alarm_stops_until_reset() {
        let mut mc = MachineController::new();
        mc.machine_mut().execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0)).unwrap();
        mc.tick(100.0);
        mc.alarm();
        let stopped = mc.status_report().machine_position[0];
        assert!(mc.tick(100.0));
        assert_eq!(mc.status_report().combined, CombinedState::Alarm);
        approx_eq(mc.status_report().machine_position[0], stopped);

        mc.reset();
        assert_eq!(mc.status_report().combined, CombinedState::Ready);
        assert!(!mc.status_report().homed[0]);
    }
}
