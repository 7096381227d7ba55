//! The canonical machine: one explicit context object that owns the model
//! state, the machine state triple and the planner it feeds.
//!
//! Blocks arrive through `execute_block` (or the per-word setters), are checked
//! before anything is touched, and are then applied in NIST execution order.
//! Planner output of a block is collected in an outbox and handed over only
//! once the whole block succeeded; a failing block restores the checkpoint
//! taken before it started.

use std::sync::Arc;

use serde::Serialize;

use crate::axis::{Axis, AXES};
use crate::block::Block;
use crate::config::MachineConfig;
use crate::error::{CmError, Fault, Result};
use crate::gcode::{
    CoordSystem, DistanceMode, GCodeState, GCodeStateExtended, MotionMode, NextAction, PathControl, Plane,
    ProgramFlow, SpindleMode, UnitsMode, COORDS,
};
use crate::homing::HomingCycle;
use crate::modal::{self, Code};
use crate::planner::{Command, MotionPlanner, PlannerBlock, RuntimeEvent};
use crate::probing::{ProbeCycle, ProbeResult};
use crate::sequencer::{RequestFlags, RequestHandle};
use crate::state::{CombinedState, CycleState, HoldState, HomingState, MachineState, MachineStatus, MotionState};
use crate::switches::SwitchInputs;

/// Highest tool number accepted by T.
pub const TOOLS: u8 = 32;

/// Which copy of the canonical state an accessor reads.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Model,
    Planner,
    Runtime,
}

/// Model settings a homing or probing cycle takes over and gives back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SavedModal {
    units_mode: UnitsMode,
    distance_mode: DistanceMode,
    coord_system: CoordSystem,
    motion_mode: MotionMode,
    feed_rate: f64,
    inverse_feed_rate_mode: bool,
}

impl SavedModal {
    pub(crate) fn save(gm: &GCodeState) -> Self {
        Self {
            units_mode: gm.units_mode,
            distance_mode: gm.distance_mode,
            coord_system: gm.coord_system,
            motion_mode: gm.motion_mode,
            feed_rate: gm.feed_rate,
            inverse_feed_rate_mode: gm.inverse_feed_rate_mode,
        }
    }

    pub(crate) fn restore(&self, gm: &mut GCodeState) {
        gm.units_mode = self.units_mode;
        gm.distance_mode = self.distance_mode;
        gm.coord_system = self.coord_system;
        gm.motion_mode = self.motion_mode;
        gm.feed_rate = self.feed_rate;
        gm.inverse_feed_rate_mode = self.inverse_feed_rate_mode;
    }
}

#[derive(Debug, Clone)]
struct Checkpoint {
    gm: GCodeState,
    gmx: GCodeStateExtended,
    offsets: [[f64; AXES]; COORDS + 1],
    g10_persist: bool,
    status: MachineStatus,
    homed: [bool; AXES],
    homing_state: HomingState,
    homing: Option<HomingCycle>,
    probe: Option<ProbeCycle>,
    probe_result: Option<ProbeResult>,
}

pub struct CanonicalMachine<P: MotionPlanner> {
    pub(crate) config: MachineConfig,
    // row 0 is machine coordinates, rows 1..=6 are G54..G59
    pub(crate) offsets: [[f64; AXES]; COORDS + 1],
    pub(crate) status: MachineStatus,
    pub(crate) hold_state: HoldState,
    pub(crate) homing_state: HomingState,
    pub(crate) homed: [bool; AXES],
    // coordinate offsets changed since the last save
    pub(crate) g10_persist: bool,
    pub(crate) requests: Arc<RequestFlags>,
    pub(crate) gm: GCodeState,
    pub(crate) gmx: GCodeStateExtended,
    pub(crate) planner: P,
    pub(crate) homing: Option<HomingCycle>,
    pub(crate) probe: Option<ProbeCycle>,
    pub(crate) probe_result: Option<ProbeResult>,
    // a queue flush finalizes to program stop once the hold is released
    pub(crate) flush_pending_stop: bool,
    outbox: Vec<PlannerBlock>,
    txn_depth: u32,
}

impl<P: MotionPlanner> CanonicalMachine<P> {
    pub fn new(config: MachineConfig, planner: P) -> Self {
        let mut cm = Self {
            config,
            offsets: [[0.0; AXES]; COORDS + 1],
            status: MachineStatus::new(),
            hold_state: HoldState::Off,
            homing_state: HomingState::NotHomed,
            homed: [false; AXES],
            g10_persist: false,
            requests: Arc::new(RequestFlags::default()),
            gm: GCodeState::default(),
            gmx: GCodeStateExtended::default(),
            planner,
            homing: None,
            probe: None,
            probe_result: None,
            flush_pending_stop: false,
            outbox: Vec::new(),
            txn_depth: 0,
        };
        cm.apply_power_on_defaults();
        cm.status.ready();
        console_log!("canonical machine ready");
        cm
    }

    fn apply_power_on_defaults(&mut self) {
        self.gm.coord_system = self.config.coord_system;
        self.gm.units_mode = self.config.units_mode;
        self.gm.path_control = self.config.path_control;
        self.gm.distance_mode = self.config.distance_mode;
        self.select_plane(self.config.select_plane);
        self.set_work_offsets();
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MachineConfig {
        &mut self.config
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut P {
        &mut self.planner
    }

    /// Handle for the communication layer. Cheap to clone, usable from any
    /// thread.
    pub fn requests(&self) -> RequestHandle {
        RequestHandle::new(Arc::clone(&self.requests))
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn machine_state(&self) -> MachineState {
        self.status.machine()
    }

    pub fn cycle_state(&self) -> CycleState {
        self.status.cycle()
    }

    pub fn motion_state(&self) -> MotionState {
        self.status.motion()
    }

    pub fn combined_state(&self) -> CombinedState {
        self.status.combined()
    }

    pub fn hold_state(&self) -> HoldState {
        self.hold_state
    }

    pub fn homing_state(&self) -> HomingState {
        self.homing_state
    }

    pub fn is_homed(&self, axis: Axis) -> bool {
        self.homed[axis.index()]
    }

    pub fn block_delete_switch(&self) -> bool {
        self.gmx.block_delete_switch
    }

    /// With the switch on, blocks marked with `/` are skipped.
    pub fn set_block_delete_switch(&mut self, on: bool) {
        self.gmx.block_delete_switch = on;
    }

    pub fn g10_persist(&self) -> bool {
        self.g10_persist
    }

    /// Clear the unsaved-offsets flag once the offsets were written out.
    pub fn offsets_persisted(&mut self) {
        self.g10_persist = false;
    }

    /// Value copy of the model, as handed to the planner.
    pub fn snapshot(&self) -> GCodeState {
        self.gm
    }

    pub fn extended(&self) -> &GCodeStateExtended {
        &self.gmx
    }

    pub fn runtime_state(&self) -> GCodeState {
        *self.planner.runtime_state()
    }

    /// The view status reports should read: the runtime while a cycle is
    /// active, the model otherwise.
    pub fn active_view(&self) -> View {
        if self.status.in_cycle() { View::Runtime } else { View::Model }
    }

    /// Canonical state for a view. The planner view falls back to the model
    /// when nothing is waiting in the queue.
    pub fn state(&self, view: View) -> GCodeState {
        match view {
            View::Model => self.gm,
            View::Planner => self.planner.planning_state().copied().unwrap_or(self.gm),
            View::Runtime => *self.planner.runtime_state(),
        }
    }

    // ── Transactions ──────────────────────────────────────────────────────

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            gm: self.gm,
            gmx: self.gmx,
            offsets: self.offsets,
            g10_persist: self.g10_persist,
            status: self.status,
            homed: self.homed,
            homing_state: self.homing_state,
            homing: self.homing.clone(),
            probe: self.probe.clone(),
            probe_result: self.probe_result,
        }
    }

    fn restore(&mut self, cp: Checkpoint) {
        self.gm = cp.gm;
        self.gmx = cp.gmx;
        self.offsets = cp.offsets;
        self.g10_persist = cp.g10_persist;
        self.status = cp.status;
        self.homed = cp.homed;
        self.homing_state = cp.homing_state;
        self.homing = cp.homing;
        self.probe = cp.probe;
        self.probe_result = cp.probe_result;
    }

    /// Run `f` atomically. Nested calls join the outermost transaction, which
    /// alone commits planner output or rolls everything back.
    pub(crate) fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.txn_depth > 0 {
            return f(self);
        }
        let saved = self.checkpoint();
        self.txn_depth += 1;
        let result = f(self);
        self.txn_depth -= 1;
        match result {
            Ok(value) => {
                let queued = !self.outbox.is_empty();
                for block in self.outbox.drain(..) {
                    self.planner.queue(block);
                }
                if queued {
                    self.begin_machining_cycle();
                }
                Ok(value)
            }
            Err(err) => {
                self.outbox.clear();
                self.restore(saved);
                if let CmError::Fault(fault) = err {
                    self.alarm(fault);
                }
                Err(err)
            }
        }
    }

    /// Stage a planner block for the current transaction.
    pub(crate) fn emit(&mut self, block: PlannerBlock) -> Result<()> {
        if self.outbox.len() >= self.planner.available() {
            return Err(CmError::IllegalInState("planner queue full"));
        }
        self.outbox.push(block);
        Ok(())
    }

    // ── Block execution ───────────────────────────────────────────────────

    /// Validate and apply one interpreted block. On any error the model,
    /// offsets and machine state are exactly what they were before the call
    /// and nothing reaches the planner.
    pub fn execute_block(&mut self, block: &Block) -> Result<()> {
        if block.block_delete && self.gmx.block_delete_switch {
            log::debug!("block deleted");
            return Ok(());
        }
        modal::validate(&block.codes)?;
        self.check_block(block)?;
        self.transaction(|cm| cm.apply_block(block))
    }

    fn check_block(&self, block: &Block) -> Result<()> {
        if self.status.is_alarmed() {
            return Err(CmError::IllegalInState("machine is in alarm"));
        }
        if self.homing.is_some() || self.probe.is_some() {
            return Err(CmError::IllegalInState("homing or probing cycle in progress"));
        }
        let scalars = [block.feed_rate, block.spindle_speed, block.parameter, block.arc_radius];
        let mut words = block.target.iter().chain(&block.arc_offset).chain(&scalars).flatten();
        if words.any(|v| !v.is_finite()) {
            return Err(CmError::ParameterOutOfRange("non-numeric word value"));
        }
        if block.feed_rate.is_some_and(|f| f < 0.0) {
            return Err(CmError::ParameterOutOfRange("negative feed rate"));
        }
        if block.spindle_speed.is_some_and(|s| s < 0.0) {
            return Err(CmError::ParameterOutOfRange("negative spindle speed"));
        }
        if block.tool.is_some_and(|t| t > TOOLS) {
            return Err(CmError::ParameterOutOfRange("tool number"));
        }
        if block.has(Code::G4) && !block.parameter.is_some_and(|p| p >= 0.0) {
            return Err(CmError::ParameterOutOfRange("dwell needs a non-negative P"));
        }
        if block.has(Code::G10) {
            if block.l_word != Some(2) {
                return Err(CmError::ParameterOutOfRange("only G10 L2 is supported"));
            }
            if coord_from_p(block.parameter).is_none() {
                return Err(CmError::ParameterOutOfRange("G10 P must select G54..G59"));
            }
        }
        for code in [Code::M50_1, Code::M50_3, Code::M51_1] {
            if block.has(code) && block.parameter.is_none() {
                return Err(CmError::ParameterOutOfRange("override factor needs P"));
            }
        }
        let arc = block.has(Code::G2)
            || block.has(Code::G3)
            || (!block.codes.iter().any(|c| c.group() == modal::ModalGroup::Motion)
                && matches!(self.gm.motion_mode, MotionMode::CwArc | MotionMode::CcwArc));
        if arc && block.has_axis_words() && block.arc_radius.is_none() && block.arc_offset.iter().all(Option::is_none) {
            return Err(CmError::ParameterOutOfRange("arc needs R or IJK"));
        }
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        if let Some(n) = block.linenum {
            self.gm.linenum = n;
        }
        self.gmx.next_action = NextAction::Default;
        if let Some(l) = block.l_word {
            self.gmx.l_word = l;
        }

        if block.has(Code::G93) {
            self.set_inverse_feed_rate_mode(true);
        } else if block.has(Code::G94) {
            self.set_inverse_feed_rate_mode(false);
        }
        // F and axis words are read in the block's own units
        if block.has(Code::G20) {
            self.set_units_mode(UnitsMode::Inches);
        } else if block.has(Code::G21) {
            self.set_units_mode(UnitsMode::Millimeters);
        }
        if let Some(f) = block.feed_rate {
            self.set_feed_rate(f)?;
        }
        if let Some(s) = block.spindle_speed {
            self.set_spindle_speed(s)?;
        }
        if let Some(t) = block.tool {
            self.select_tool(t)?;
        }
        if block.has(Code::M6) {
            self.change_tool()?;
        }

        if block.has(Code::M3) {
            self.spindle_control(SpindleMode::Cw)?;
        } else if block.has(Code::M4) {
            self.spindle_control(SpindleMode::Ccw)?;
        } else if block.has(Code::M5) {
            self.spindle_control(SpindleMode::Off)?;
        }
        if block.has(Code::M9) {
            self.coolant_off()?;
        } else {
            if block.has(Code::M7) {
                self.mist_coolant_control(true)?;
            }
            if block.has(Code::M8) {
                self.flood_coolant_control(true)?;
            }
        }
        self.apply_override_codes(block)?;

        if block.has(Code::G4) {
            self.gmx.next_action = NextAction::Dwell;
            self.dwell(block.parameter.unwrap_or(0.0))?;
        }

        if block.has(Code::G17) {
            self.select_plane(Plane::XY);
        } else if block.has(Code::G18) {
            self.select_plane(Plane::XZ);
        } else if block.has(Code::G19) {
            self.select_plane(Plane::YZ);
        }
        // G40, G43/G49 and G98/G99 are accepted; only the cancelled states exist here

        let coord = [Code::G54, Code::G55, Code::G56, Code::G57, Code::G58, Code::G59]
            .iter()
            .position(|c| block.has(*c));
        if let Some(coord) = coord.and_then(|i| CoordSystem::from_index(i + 1)) {
            self.set_coord_system(coord);
        }

        if block.has(Code::G61) {
            self.set_path_control(PathControl::ExactPath);
        } else if block.has(Code::G61_1) {
            self.set_path_control(PathControl::ExactStop);
        } else if block.has(Code::G64) {
            self.set_path_control(PathControl::Continuous);
        }
        if block.has(Code::G90) {
            self.set_distance_mode(DistanceMode::Absolute);
        } else if block.has(Code::G91) {
            self.set_distance_mode(DistanceMode::Incremental);
        }

        if block.has(Code::G53) {
            self.set_absolute_override(true);
        }
        let result = self.apply_non_modal_and_motion(block);
        self.set_absolute_override(false);
        result?;

        if block.has(Code::M0) || block.has(Code::M60) {
            self.program_stop()?;
        } else if block.has(Code::M1) {
            self.optional_program_stop()?;
        } else if block.has(Code::M2) || block.has(Code::M30) {
            self.program_end()?;
        }
        Ok(())
    }

    fn apply_override_codes(&mut self, block: &Block) -> Result<()> {
        let p = block.parameter;
        let enable = p.is_none_or(|p| p != 0.0);
        if block.has(Code::M48) {
            self.override_enables(true);
        } else if block.has(Code::M49) {
            self.override_enables(false);
        } else if block.has(Code::M50) {
            self.gmx.overrides.set_feed_enable(enable);
        } else if block.has(Code::M50_1) {
            self.gmx.overrides.set_feed_factor(p.unwrap_or(1.0))?;
        } else if block.has(Code::M50_2) {
            self.gmx.overrides.set_traverse_enable(enable);
        } else if block.has(Code::M50_3) {
            self.gmx.overrides.set_traverse_factor(p.unwrap_or(1.0))?;
        } else if block.has(Code::M51) {
            self.gmx.overrides.set_spindle_enable(enable);
        } else if block.has(Code::M51_1) {
            self.gmx.overrides.set_spindle_factor(p.unwrap_or(1.0))?;
        }
        Ok(())
    }

    fn apply_non_modal_and_motion(&mut self, block: &Block) -> Result<()> {
        let target = &block.target;
        if block.has(Code::G10) {
            self.gmx.next_action = NextAction::SetCoordData;
            if let Some(coord) = coord_from_p(block.parameter) {
                self.set_coord_offsets(coord, target)?;
            }
        } else if block.has(Code::G28) {
            self.gmx.next_action = NextAction::GotoG28Position;
            self.goto_g28_position(target)?;
        } else if block.has(Code::G28_1) {
            self.gmx.next_action = NextAction::SetG28Position;
            self.set_g28_position();
        } else if block.has(Code::G28_2) {
            self.gmx.next_action = NextAction::SearchHome;
            self.homing_cycle_start(target)?;
        } else if block.has(Code::G28_3) {
            self.gmx.next_action = NextAction::SetAbsoluteOrigin;
            self.set_absolute_origin(target)?;
        } else if block.has(Code::G28_4) {
            self.gmx.next_action = NextAction::HomingNoSet;
            self.homing_cycle_start_no_set(target)?;
        } else if block.has(Code::G30) {
            self.gmx.next_action = NextAction::GotoG30Position;
            self.goto_g30_position(target)?;
        } else if block.has(Code::G30_1) {
            self.gmx.next_action = NextAction::SetG30Position;
            self.set_g30_position();
        } else if block.has(Code::G92) {
            self.gmx.next_action = NextAction::SetOriginOffsets;
            self.set_origin_offsets(target)?;
        } else if block.has(Code::G92_1) {
            self.gmx.next_action = NextAction::ResetOriginOffsets;
            self.reset_origin_offsets();
        } else if block.has(Code::G92_2) {
            self.gmx.next_action = NextAction::SuspendOriginOffsets;
            self.suspend_origin_offsets();
        } else if block.has(Code::G92_3) {
            self.gmx.next_action = NextAction::ResumeOriginOffsets;
            self.resume_origin_offsets();
        } else if block.has(Code::G38_2) {
            self.gmx.next_action = NextAction::StraightProbe;
            return self.probe_cycle_start(target);
        }

        let motion = [
            (Code::G0, MotionMode::StraightTraverse),
            (Code::G1, MotionMode::StraightFeed),
            (Code::G2, MotionMode::CwArc),
            (Code::G3, MotionMode::CcwArc),
            (Code::G80, MotionMode::CancelMotionMode),
        ]
        .into_iter()
        .find(|(code, _)| block.has(*code));
        if let Some((_, mode)) = motion {
            self.gm.motion_mode = mode;
        }

        // axis words belong to the non-modal command when there is one
        if !matches!(self.gmx.next_action, NextAction::Default | NextAction::Dwell) || !block.has_axis_words() {
            return Ok(());
        }
        if self.gm.motion_mode.is_feed() && self.gm.inverse_feed_rate_mode && block.feed_rate.is_none() {
            return Err(CmError::ParameterOutOfRange("inverse time feed needs F on every block"));
        }
        match self.gm.motion_mode {
            MotionMode::StraightTraverse => self.straight_traverse(target),
            MotionMode::StraightFeed => self.straight_feed(target),
            MotionMode::CwArc | MotionMode::CcwArc => {
                let clockwise = self.gm.motion_mode == MotionMode::CwArc;
                self.arc_feed(target, &block.arc_offset, block.arc_radius, clockwise)
            }
            MotionMode::CancelMotionMode | MotionMode::StraightProbe => {
                Err(CmError::ParameterOutOfRange("axis words with motion cancelled"))
            }
        }
    }

    // ── Modal setters ─────────────────────────────────────────────────────

    pub fn select_plane(&mut self, plane: Plane) {
        self.gm.select_plane = plane;
        let [a0, a1, a2] = plane.axes();
        self.gmx.plane_axis_0 = a0;
        self.gmx.plane_axis_1 = a1;
        self.gmx.plane_axis_2 = a2;
    }

    pub fn set_units_mode(&mut self, units: UnitsMode) {
        self.gm.units_mode = units;
    }

    pub fn set_distance_mode(&mut self, mode: DistanceMode) {
        self.gm.distance_mode = mode;
    }

    pub fn set_path_control(&mut self, mode: PathControl) {
        self.gm.path_control = mode;
    }

    pub fn set_inverse_feed_rate_mode(&mut self, enable: bool) {
        self.gm.inverse_feed_rate_mode = enable;
    }

    /// F word. In inverse time mode the value is 1/minutes and is kept aside;
    /// otherwise it is converted to mm/min.
    pub fn set_feed_rate(&mut self, feed_rate: f64) -> Result<()> {
        if !feed_rate.is_finite() || feed_rate < 0.0 {
            return Err(CmError::ParameterOutOfRange("feed rate"));
        }
        if self.gm.inverse_feed_rate_mode {
            self.gmx.inverse_feed_rate = feed_rate;
        } else {
            self.gm.feed_rate = self.gm.units_mode.to_millimeters(feed_rate);
        }
        Ok(())
    }

    pub fn set_spindle_speed(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(CmError::ParameterOutOfRange("spindle speed"));
        }
        self.gm.spindle_speed = speed;
        Ok(())
    }

    /// Spindle speed after the spindle override.
    pub fn effective_spindle_speed(&self, view: View) -> f64 {
        self.state(view).spindle_speed * self.gmx.overrides.spindle_factor()
    }

    pub fn select_tool(&mut self, tool: u8) -> Result<()> {
        if tool > TOOLS {
            return Err(CmError::ParameterOutOfRange("tool number"));
        }
        self.gm.tool_select = tool;
        Ok(())
    }

    // M6
    pub fn change_tool(&mut self) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.tool = cm.gm.tool_select;
            cm.emit(PlannerBlock::Command(cm.gm, Command::ToolChange))
        })
    }

    pub fn spindle_control(&mut self, mode: SpindleMode) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.spindle_mode = mode;
            cm.emit(PlannerBlock::Command(cm.gm, Command::Spindle))
        })
    }

    // M7
    pub fn mist_coolant_control(&mut self, on: bool) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.mist_coolant = on;
            cm.emit(PlannerBlock::Command(cm.gm, Command::Coolant))
        })
    }

    // M8
    pub fn flood_coolant_control(&mut self, on: bool) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.flood_coolant = on;
            cm.emit(PlannerBlock::Command(cm.gm, Command::Coolant))
        })
    }

    // M9
    pub fn coolant_off(&mut self) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.mist_coolant = false;
            cm.gm.flood_coolant = false;
            cm.emit(PlannerBlock::Command(cm.gm, Command::Coolant))
        })
    }

    // ── Overrides ─────────────────────────────────────────────────────────

    pub fn override_enables(&mut self, enabled: bool) {
        self.gmx.overrides.set_enables(enabled);
    }

    pub fn feed_rate_override_enable(&mut self, enable: bool) {
        self.gmx.overrides.set_feed_enable(enable);
    }

    pub fn feed_rate_override_factor(&mut self, factor: f64) -> Result<()> {
        self.gmx.overrides.set_feed_factor(factor)
    }

    pub fn traverse_override_enable(&mut self, enable: bool) {
        self.gmx.overrides.set_traverse_enable(enable);
    }

    pub fn traverse_override_factor(&mut self, factor: f64) -> Result<()> {
        self.gmx.overrides.set_traverse_factor(factor)
    }

    pub fn spindle_override_enable(&mut self, enable: bool) {
        self.gmx.overrides.set_spindle_enable(enable);
    }

    pub fn spindle_override_factor(&mut self, factor: f64) -> Result<()> {
        self.gmx.overrides.set_spindle_factor(factor)
    }

    // ── Program flow ──────────────────────────────────────────────────────

    /// G4, `seconds` of dwell queued behind the current moves.
    pub fn dwell(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(CmError::ParameterOutOfRange("dwell time"));
        }
        self.transaction(|cm| {
            cm.require_motion_allowed()?;
            cm.gm.parameter = seconds;
            cm.emit(PlannerBlock::Dwell(cm.gm))
        })
    }

    fn require_program_flow(&self) -> Result<()> {
        match self.status.machine() {
            MachineState::Alarm | MachineState::Initializing => {
                Err(CmError::IllegalInState("program stop/end while alarmed or initializing"))
            }
            _ => Ok(()),
        }
    }

    // M0, M60
    pub fn program_stop(&mut self) -> Result<()> {
        self.require_program_flow()?;
        self.transaction(|cm| {
            cm.gmx.program_flow = ProgramFlow::Stop;
            cm.emit(PlannerBlock::Command(cm.gm, Command::ProgramStop))
        })
    }

    // M1, no optional stop switch exists so it always stops
    pub fn optional_program_stop(&mut self) -> Result<()> {
        self.program_stop()
    }

    // M2, M30
    pub fn program_end(&mut self) -> Result<()> {
        self.require_program_flow()?;
        self.transaction(|cm| {
            cm.gmx.program_flow = ProgramFlow::End;
            cm.reset_model_for_program_end();
            cm.emit(PlannerBlock::Command(cm.gm, Command::ProgramEnd))
        })
    }

    fn reset_model_for_program_end(&mut self) {
        self.gm.coord_system = self.config.coord_system;
        self.select_plane(self.config.select_plane);
        self.gm.distance_mode = self.config.distance_mode;
        self.gm.path_control = self.config.path_control;
        self.gm.inverse_feed_rate_mode = false;
        self.gm.spindle_mode = SpindleMode::Off;
        self.gm.mist_coolant = false;
        self.gm.flood_coolant = false;
        self.gm.motion_mode = MotionMode::CancelMotionMode;
        self.gmx.origin_offset_enable = false;
        self.gmx.origin_offset = [0.0; AXES];
        self.set_work_offsets();
    }

    /// Runtime reached a queued program stop or end.
    pub(crate) fn handle_runtime_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::ProgramStop => {
                if self.status.program_finalize(MachineState::ProgramStop) {
                    self.hold_state = HoldState::Off;
                    console_log!("program stop at line {}", self.planner.runtime_state().linenum);
                }
            }
            RuntimeEvent::ProgramEnd => {
                if self.status.program_finalize(MachineState::ProgramEnd) {
                    self.hold_state = HoldState::Off;
                    self.gmx.program_flow = ProgramFlow::Running;
                    console_log!("program end");
                }
            }
            RuntimeEvent::QueueEmpty => {
                if self.status.cycle() == CycleState::Machining && self.hold_state == HoldState::Off {
                    self.status.cycle_end();
                }
            }
        }
    }

    // ── Cycles ────────────────────────────────────────────────────────────

    pub(crate) fn require_motion_allowed(&self) -> Result<()> {
        if self.status.is_alarmed() {
            return Err(CmError::IllegalInState("machine is in alarm"));
        }
        if self.status.machine() == MachineState::Initializing {
            return Err(CmError::IllegalInState("machine is initializing"));
        }
        if matches!(self.status.cycle(), CycleState::Homing | CycleState::Probe | CycleState::Jog) {
            return Err(CmError::IllegalInState("homing or probing cycle in progress"));
        }
        Ok(())
    }

    /// Queued work starts a machining cycle. A runtime parked at a program
    /// stop stays parked until cycle start. Homing and probing keep their own
    /// cycle.
    pub(crate) fn begin_machining_cycle(&mut self) {
        if self.status.cycle() == CycleState::Machining || self.planner.parked() {
            return;
        }
        if self.status.cycle_start(CycleState::Machining) {
            self.planner.resume();
        }
    }

    /// Direct cycle start, as opposed to the request flag.
    pub fn cycle_start(&mut self) -> Result<()> {
        self.require_motion_allowed()?;
        if !self.status.cycle_start(CycleState::Machining) {
            return Err(CmError::IllegalInState("cycle start"));
        }
        self.planner.resume();
        Ok(())
    }

    pub fn cycle_end(&mut self) -> Result<()> {
        if !self.status.cycle_end() {
            return Err(CmError::IllegalInState("no cycle to end"));
        }
        self.hold_state = HoldState::Off;
        Ok(())
    }

    /// One control loop iteration: request sequencing, then whichever
    /// homing or probing cycle is running.
    pub fn control_loop(&mut self, switches: &impl SwitchInputs) -> Result<()> {
        self.sequencing_callback();
        self.homing_callback(switches)?;
        self.probe_callback(switches)?;
        Ok(())
    }

    // ── Alarm ─────────────────────────────────────────────────────────────

    /// Enter Alarm. Motion stops, queued work is discarded and any homing or
    /// probing cycle is abandoned. Only `reset` leaves Alarm.
    pub fn alarm(&mut self, fault: Fault) -> CmError {
        log::warn!("alarm: {fault}");
        self.planner.halt();
        self.sync_position_to_runtime();
        self.abandon_cycles();
        self.hold_state = HoldState::Off;
        self.flush_pending_stop = false;
        self.status.alarm();
        self.requests.clear();
        CmError::Fault(fault)
    }

    /// External reset. Clears the alarm, the homed flags and the queue.
    pub fn reset(&mut self) {
        self.planner.halt();
        self.sync_position_to_runtime();
        self.abandon_cycles();
        self.hold_state = HoldState::Off;
        self.flush_pending_stop = false;
        self.homed = [false; AXES];
        self.homing_state = HomingState::NotHomed;
        self.requests.clear();
        self.status.reset();
        console_log!("canonical machine reset");
    }

    /// Drop a running homing or probing cycle and give the model back the
    /// settings it borrowed.
    pub(crate) fn abandon_cycles(&mut self) {
        if let Some(cycle) = self.homing.take() {
            cycle.saved.restore(&mut self.gm);
        }
        if let Some(cycle) = self.probe.take() {
            cycle.saved.restore(&mut self.gm);
        }
        if matches!(self.status.cycle(), CycleState::Homing | CycleState::Probe) {
            self.status.cycle_end();
        }
        self.set_work_offsets();
    }

    /// Switch contact: stop dead and take the position where motion stopped.
    pub(crate) fn halt_at_contact(&mut self) {
        self.planner.halt();
        self.sync_position_to_runtime();
    }

    /// Make the model agree with where the runtime actually is.
    pub(crate) fn sync_position_to_runtime(&mut self) {
        let position = self.planner.runtime_position();
        self.gmx.position = position;
        self.gm.target = position;
    }
}

/// P1..P6 of G10 L2 select G54..G59.
fn coord_from_p(p: Option<f64>) -> Option<CoordSystem> {
    let p = p?;
    if p.fract() != 0.0 || !(1.0..=COORDS as f64).contains(&p) {
        return None;
    }
    CoordSystem::from_index(p as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::planner::QueuePlanner;
    use crate::switches::SwitchBank;

    pub(crate) fn approx_eq(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-6, "expected {:.6}, got {:.6} (|diff|={:.6})", b, a, (a - b).abs());
    }

    pub(crate) fn machine() -> CanonicalMachine<QueuePlanner> {
        CanonicalMachine::new(MachineConfig::default(), QueuePlanner::new())
    }

    /// Tick the runtime and run the control loop until the queue drains.
    pub(crate) fn run_to_idle(cm: &mut CanonicalMachine<QueuePlanner>) {
        let switches = SwitchBank::default();
        for _ in 0..10_000 {
            cm.planner_mut().tick(10.0);
            cm.control_loop(&switches).unwrap();
            if !cm.planner().is_busy() {
                cm.sequencing_callback();
                return;
            }
        }
        panic!("runtime never drained");
    }

    #[test]
    fn starts_ready_with_power_on_defaults() {
        let cm = machine();
        assert_eq!(cm.combined_state(), CombinedState::Ready);
        let gm = cm.snapshot();
        assert_eq!(gm.coord_system, CoordSystem::G54);
        assert_eq!(gm.units_mode, UnitsMode::Millimeters);
        assert_eq!(gm.distance_mode, DistanceMode::Absolute);
        assert_eq!(cm.active_view(), View::Model);
    }

    #[test]
    fn modal_violation_leaves_model_unchanged() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 5.0).feed(100.0)).unwrap();
        let gm = cm.snapshot();
        let gmx = *cm.extended();
        let queued = cm.planner().queued();

        let bad = Block::new().code(Code::G0).code(Code::G1).code(Code::G20).axis(Axis::X, 20.0).feed(50.0);
        assert_eq!(cm.execute_block(&bad), Err(CmError::ModalGroupViolation(modal::ModalGroup::Motion)));
        assert_eq!(cm.snapshot(), gm);
        assert_eq!(*cm.extended(), gmx);
        assert_eq!(cm.planner().queued(), queued);
    }

    #[test]
    fn failing_block_rolls_back_earlier_words() {
        let mut cm = machine();
        let gm = cm.snapshot();
        // G20 and F are applied before the feed move discovers it has no rate
        let bad = Block::new().code(Code::G20).code(Code::G93).code(Code::M3).code(Code::G1).axis(Axis::X, 1.0);
        assert!(matches!(cm.execute_block(&bad), Err(CmError::ParameterOutOfRange(_))));
        assert_eq!(cm.snapshot(), gm);
        assert_eq!(cm.planner().queued(), 0);
        assert_eq!(cm.combined_state(), CombinedState::Ready);
    }

    #[test]
    fn parameter_checks_reject_before_mutation() {
        let mut cm = machine();
        let gm = cm.snapshot();
        for bad in [
            Block::new().code(Code::G1).axis(Axis::X, 1.0).feed(-5.0),
            Block::new().spindle(-1.0),
            Block::new().tool(TOOLS + 1),
            Block::new().code(Code::G4),
            Block::new().code(Code::G10).l(2).p(7.0).axis(Axis::X, 1.0),
            Block::new().code(Code::G10).l(20).p(1.0).axis(Axis::X, 1.0),
            Block::new().code(Code::G2).axis(Axis::X, 1.0).feed(100.0),
            Block::new().code(Code::G1).axis(Axis::X, f64::NAN).feed(100.0),
        ] {
            assert!(matches!(cm.execute_block(&bad), Err(CmError::ParameterOutOfRange(_))), "{bad:?}");
            assert_eq!(cm.snapshot(), gm);
        }
    }

    #[test]
    fn feed_move_without_rate_is_rejected() {
        let mut cm = machine();
        let err = cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0));
        assert_eq!(err, Err(CmError::ParameterOutOfRange("feed rate not set")));
    }

    #[test]
    fn inch_feed_rate_is_normalized() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G20).feed(10.0)).unwrap();
        approx_eq(cm.snapshot().feed_rate, 254.0);
    }

    #[test]
    fn moves_start_a_cycle_and_drain_to_ready() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0).line(7)).unwrap();
        assert_eq!(cm.combined_state(), CombinedState::Run);
        assert_eq!(cm.active_view(), View::Runtime);
        assert_eq!(cm.state(View::Planner).linenum, 7);
        approx_eq(cm.extended().position[0], 10.0);
        run_to_idle(&mut cm);
        assert_eq!(cm.combined_state(), CombinedState::Ready);
        approx_eq(cm.planner().runtime_position()[0], 10.0);
        assert_eq!(cm.runtime_state().linenum, 7);
    }

    #[test]
    fn program_stop_and_end_finalize_at_runtime() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 1.0).feed(600.0)).unwrap();
        cm.execute_block(&Block::new().code(Code::M0)).unwrap();
        run_to_idle(&mut cm);
        assert_eq!(cm.combined_state(), CombinedState::ProgramStop);

        cm.execute_block(&Block::new().code(Code::G55).code(Code::M8).code(Code::M2)).unwrap();
        assert_eq!(cm.snapshot().coord_system, CoordSystem::G54);
        assert!(!cm.snapshot().flood_coolant);
        assert_eq!(cm.combined_state(), CombinedState::ProgramStop);
        cm.request_cycle_start();
        run_to_idle(&mut cm);
        assert_eq!(cm.combined_state(), CombinedState::ProgramEnd);
    }

    #[test]
    fn block_delete_switch_skips_marked_blocks() {
        let mut cm = machine();
        assert!(cm.block_delete_switch());
        cm.execute_block(&Block::new().code(Code::G0).axis(Axis::X, 5.0).deletable()).unwrap();
        assert_eq!(cm.planner().queued(), 0);
        approx_eq(cm.snapshot().target[0], 0.0);

        cm.set_block_delete_switch(false);
        cm.execute_block(&Block::new().code(Code::G0).axis(Axis::X, 5.0).deletable()).unwrap();
        assert_eq!(cm.planner().queued(), 1);
    }

    #[test]
    fn program_end_is_illegal_in_alarm() {
        let mut cm = machine();
        cm.alarm(Fault::ExternalAlarm);
        assert!(matches!(cm.program_end(), Err(CmError::IllegalInState(_))));
        assert!(matches!(cm.execute_block(&Block::new().code(Code::M2)), Err(CmError::IllegalInState(_))));
        assert_eq!(cm.combined_state(), CombinedState::Alarm);
        cm.reset();
        assert_eq!(cm.combined_state(), CombinedState::Ready);
        assert!(cm.program_end().is_ok());
    }

    #[test]
    fn alarm_discards_queue_and_blocks_motion() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0)).unwrap();
        cm.planner_mut().tick(500.0);
        assert_eq!(cm.alarm(Fault::ExternalAlarm), CmError::Fault(Fault::ExternalAlarm));
        assert!(!cm.planner().is_busy());
        approx_eq(cm.extended().position[0], 5.0);
        assert!(cm.straight_feed(&[Some(1.0), None, None, None, None, None]).is_err());
    }

    #[test]
    fn planner_overflow_rejects_the_whole_block() {
        let mut cm = CanonicalMachine::new(MachineConfig::default(), QueuePlanner::with_capacity(1));
        // spindle command plus a move need two slots
        let block = Block::new().code(Code::M3).spindle(1000.0).code(Code::G0).axis(Axis::X, 1.0);
        assert_eq!(cm.execute_block(&block), Err(CmError::IllegalInState("planner queue full")));
        assert_eq!(cm.snapshot().spindle_mode, SpindleMode::Off);
        assert_eq!(cm.planner().queued(), 0);
    }

    #[test]
    fn mist_and_flood_are_independent() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::M7).code(Code::M8)).unwrap();
        assert!(cm.snapshot().mist_coolant && cm.snapshot().flood_coolant);
        cm.execute_block(&Block::new().code(Code::M9)).unwrap();
        assert!(!cm.snapshot().mist_coolant && !cm.snapshot().flood_coolant);
    }

    #[test]
    fn override_codes_drive_the_controller() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::M50).p(1.0)).unwrap();
        cm.execute_block(&Block::new().code(Code::M50_1).p(1.5)).unwrap();
        approx_eq(cm.extended().overrides.feed_factor(), 1.5);
        cm.execute_block(&Block::new().code(Code::M49)).unwrap();
        approx_eq(cm.extended().overrides.feed_factor(), 1.0);
        cm.execute_block(&Block::new().code(Code::M48)).unwrap();
        approx_eq(cm.extended().overrides.feed_factor(), 1.5);
        assert!(cm.execute_block(&Block::new().code(Code::M50_1).p(3.0)).is_err());
        approx_eq(cm.extended().overrides.feed.factor, 1.5);
    }

    #[test]
    fn tool_select_and_change() {
        let mut cm = machine();
        cm.execute_block(&Block::new().tool(4)).unwrap();
        assert_eq!(cm.snapshot().tool, 0);
        cm.execute_block(&Block::new().code(Code::M6)).unwrap();
        assert_eq!(cm.snapshot().tool, 4);
    }

    #[test]
    fn spindle_override_scales_effective_speed() {
        let mut cm = machine();
        cm.execute_block(&Block::new().spindle(10_000.0).code(Code::M3)).unwrap();
        cm.spindle_override_enable(true);
        cm.spindle_override_factor(0.5).unwrap();
        approx_eq(cm.effective_spindle_speed(View::Model), 5_000.0);
    }
}
