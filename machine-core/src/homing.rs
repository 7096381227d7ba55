//! Homing cycle (G28.2, and G28.4 which homes without setting coordinates).
//!
//! Axes are homed one at a time, Z first so the tool clears the work. Each
//! axis runs search, backoff, latch and zero backoff, and the cycle is
//! advanced one step per control loop iteration. Contact with the switch
//! halts the planner and the model takes the halted position.

use serde::Serialize;

use crate::axis::{Axis, AXES};
use crate::error::{CmError, Fault, Result};
use crate::gcode::{DistanceMode, MotionMode, UnitsMode};
use crate::machine::{CanonicalMachine, SavedModal};
use crate::offsets::AxisWords;
use crate::planner::MotionPlanner;
use crate::state::{CycleState, HoldState, HomingState};
use crate::switches::SwitchInputs;

const HOMING_ORDER: [Axis; AXES] = [Axis::Z, Axis::X, Axis::Y, Axis::A, Axis::B, Axis::C];

/// Outcome of one homing or probing step.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum CycleProgress {
    Idle,
    Running,
    Done,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    Start,
    Search,
    Backoff,
    Latch,
    ZeroBackoff,
}

#[derive(Debug, Clone)]
pub struct HomingCycle {
    axes: Vec<Axis>,
    current: usize,
    phase: HomingPhase,
    set_coordinates: bool,
    pub(crate) saved: SavedModal,
}

impl HomingCycle {
    fn new(axes: Vec<Axis>, set_coordinates: bool, saved: SavedModal) -> Self {
        Self { axes, current: 0, phase: HomingPhase::Start, set_coordinates, saved }
    }

    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    /// Axis being homed, `None` once every axis is done.
    pub fn axis(&self) -> Option<Axis> {
        self.axes.get(self.current).copied()
    }

    /// One non-blocking step. Waiting on motion returns `Running`.
    pub fn advance<P: MotionPlanner>(
        &mut self,
        cm: &mut CanonicalMachine<P>,
        switches: &impl SwitchInputs,
    ) -> Result<CycleProgress> {
        let Some(axis) = self.axis() else {
            return Ok(CycleProgress::Done);
        };
        let cfg = *cm.config.axis(axis);
        let toward = cfg.search_velocity.signum();
        let search_velocity = cfg.search_velocity.abs();
        let closed = switches.homing_switch(axis);
        let busy = cm.planner.is_busy();

        match self.phase {
            HomingPhase::Start => {
                if closed {
                    return Err(CmError::Fault(Fault::HomingSwitchClosedAtStart));
                }
                let travel = toward * (cfg.travel_span() + cfg.latch_backoff);
                move_axis(cm, axis, travel, search_velocity)?;
                self.phase = HomingPhase::Search;
            }
            HomingPhase::Search => {
                if closed {
                    cm.halt_at_contact();
                    move_axis(cm, axis, -toward * cfg.latch_backoff, search_velocity)?;
                    self.phase = HomingPhase::Backoff;
                } else if !busy {
                    return Err(CmError::Fault(Fault::HomingSwitchNotFound));
                }
            }
            HomingPhase::Backoff => {
                if !busy {
                    move_axis(cm, axis, toward * 2.0 * cfg.latch_backoff, cfg.latch_velocity)?;
                    self.phase = HomingPhase::Latch;
                }
            }
            HomingPhase::Latch => {
                if closed {
                    cm.halt_at_contact();
                    move_axis(cm, axis, -toward * cfg.zero_backoff, search_velocity)?;
                    self.phase = HomingPhase::ZeroBackoff;
                } else if !busy {
                    return Err(CmError::Fault(Fault::HomingLatchNotFound));
                }
            }
            HomingPhase::ZeroBackoff => {
                if !busy {
                    if self.set_coordinates {
                        cm.set_axis_origin(axis, 0.0);
                    }
                    console_log!("homed {}", axis.as_char());
                    self.current += 1;
                    self.phase = HomingPhase::Start;
                }
            }
        }
        Ok(CycleProgress::Running)
    }
}

fn move_axis<P: MotionPlanner>(cm: &mut CanonicalMachine<P>, axis: Axis, delta: f64, velocity: f64) -> Result<()> {
    let mut target = cm.gmx.position;
    target[axis.index()] += delta;
    cm.queue_cycle_move(target, velocity, MotionMode::StraightFeed)
}

impl<P: MotionPlanner> CanonicalMachine<P> {
    /// G28.2: home the axes that carry a word (values are ignored). Axes
    /// without a search velocity are skipped.
    pub fn homing_cycle_start(&mut self, axes: &AxisWords) -> Result<()> {
        self.start_homing(axes, true)
    }

    // G28.4
    pub fn homing_cycle_start_no_set(&mut self, axes: &AxisWords) -> Result<()> {
        self.start_homing(axes, false)
    }

    fn start_homing(&mut self, words: &AxisWords, set_coordinates: bool) -> Result<()> {
        self.require_motion_allowed()?;
        if self.status.in_cycle() || self.planner.is_busy() {
            return Err(CmError::IllegalInState("homing needs an idle machine"));
        }
        if words.iter().all(Option::is_none) {
            return Err(CmError::ParameterOutOfRange("homing needs axis words"));
        }
        let axes: Vec<Axis> = HOMING_ORDER
            .into_iter()
            .filter(|a| words[a.index()].is_some())
            .filter(|a| {
                let cfg = self.config.axis(*a);
                cfg.homing_enabled() && cfg.axis_mode.is_active()
            })
            .collect();
        if axes.is_empty() {
            return Err(CmError::ParameterOutOfRange("no requested axis can home"));
        }
        if !self.status.cycle_start(CycleState::Homing) {
            return Err(CmError::IllegalInState("homing needs an idle machine"));
        }

        let saved = SavedModal::save(&self.gm);
        self.gm.units_mode = UnitsMode::Millimeters;
        self.gm.distance_mode = DistanceMode::Absolute;
        self.gm.inverse_feed_rate_mode = false;
        if set_coordinates {
            self.homing_state = HomingState::NotHomed;
            for axis in &axes {
                self.homed[axis.index()] = false;
            }
        }
        self.planner.resume();
        console_log!("homing {}", axes.iter().map(|a| a.as_char()).collect::<String>());
        self.homing = Some(HomingCycle::new(axes, set_coordinates, saved));
        Ok(())
    }

    pub fn homing_cycle(&self) -> Option<&HomingCycle> {
        self.homing.as_ref()
    }

    /// Advance a running homing cycle by one step. Failures abandon the
    /// cycle; faults also raise the alarm.
    pub fn homing_callback(&mut self, switches: &impl SwitchInputs) -> Result<CycleProgress> {
        let Some(mut cycle) = self.homing.take() else {
            return Ok(CycleProgress::Idle);
        };
        if self.hold_state != HoldState::Off {
            self.homing = Some(cycle);
            return Ok(CycleProgress::Running);
        }
        match cycle.advance(self, switches) {
            Ok(CycleProgress::Done) => {
                cycle.saved.restore(&mut self.gm);
                self.set_work_offsets();
                if cycle.set_coordinates {
                    self.homing_state = HomingState::Homed;
                }
                self.status.cycle_end();
                console_log!("homing complete");
                Ok(CycleProgress::Done)
            }
            Ok(progress) => {
                self.homing = Some(cycle);
                Ok(progress)
            }
            Err(err) => {
                cycle.saved.restore(&mut self.gm);
                self.set_work_offsets();
                if let CmError::Fault(fault) = err {
                    return Err(self.alarm(fault));
                }
                self.planner.halt();
                self.sync_position_to_runtime();
                self.status.cycle_end();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::config::MachineConfig;
    use crate::machine::tests::approx_eq;
    use crate::machine::View;
    use crate::modal::Code;
    use crate::planner::QueuePlanner;
    use crate::state::CombinedState;
    use crate::switches::SwitchBank;

    fn homing_machine() -> CanonicalMachine<QueuePlanner> {
        let mut cfg = MachineConfig::default();
        for ax in cfg.axes.iter_mut() {
            ax.latch_velocity = 600.0;
        }
        CanonicalMachine::new(cfg, QueuePlanner::new())
    }

    /// Switches close once the runtime reaches `at` or beyond, in the search
    /// direction (negative).
    fn switches(cm: &CanonicalMachine<QueuePlanner>, at: [Option<f64>; AXES]) -> SwitchBank {
        let mut bank = SwitchBank::default();
        for axis in Axis::ALL {
            if let Some(at) = at[axis.index()] {
                bank.set_homing(axis, cm.absolute_position(View::Runtime, axis) <= at);
            }
        }
        bank
    }

    fn run_homing(cm: &mut CanonicalMachine<QueuePlanner>, at: [Option<f64>; AXES]) -> Result<()> {
        for _ in 0..200_000 {
            cm.planner_mut().tick(10.0);
            cm.sequencing_callback();
            let bank = switches(cm, at);
            if cm.homing_callback(&bank)? == CycleProgress::Done {
                return Ok(());
            }
        }
        panic!("homing never finished");
    }

    #[test]
    fn homes_z_before_x_and_zeroes_both() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G20).code(Code::G91)).unwrap();
        cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::X, 0.0).axis(Axis::Z, 0.0)).unwrap();
        assert_eq!(cm.combined_state(), CombinedState::Homing);
        assert_eq!(cm.homing_cycle().and_then(HomingCycle::axis), Some(Axis::Z));
        assert_eq!(cm.snapshot().units_mode, UnitsMode::Millimeters);

        let mut at = [None; AXES];
        at[Axis::X.index()] = Some(-5.0);
        at[Axis::Z.index()] = Some(-2.0);
        run_homing(&mut cm, at).unwrap();

        assert!(cm.is_homed(Axis::X));
        assert!(cm.is_homed(Axis::Z));
        assert!(!cm.is_homed(Axis::Y));
        assert_eq!(cm.homing_state(), HomingState::Homed);
        approx_eq(cm.absolute_position(View::Model, Axis::X), 0.0);
        approx_eq(cm.absolute_position(View::Runtime, Axis::X), 0.0);
        approx_eq(cm.absolute_position(View::Runtime, Axis::Z), 0.0);
        assert_eq!(cm.combined_state(), CombinedState::Ready);
        assert_eq!(cm.snapshot().units_mode, UnitsMode::Inches);
        assert_eq!(cm.snapshot().distance_mode, DistanceMode::Incremental);
    }

    #[test]
    fn feedhold_between_homing_moves_keeps_the_cycle() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::X, 0.0)).unwrap();
        let mut at = [None; AXES];
        at[Axis::X.index()] = Some(-5.0);

        // stop right after the backoff move drains, before the latch is queued
        for _ in 0..200_000 {
            cm.planner_mut().tick(10.0);
            let phase = cm.homing_cycle().map(HomingCycle::phase);
            if phase == Some(HomingPhase::Backoff) && !cm.planner().is_busy() {
                break;
            }
            cm.sequencing_callback();
            let bank = switches(&cm, at);
            cm.homing_callback(&bank).unwrap();
        }
        assert!(!cm.planner().is_busy());

        cm.request_feedhold();
        while cm.hold_state() != HoldState::Hold {
            cm.planner_mut().tick(10.0);
            cm.sequencing_callback();
        }
        assert_eq!(cm.combined_state(), CombinedState::Homing);

        cm.request_cycle_start();
        cm.sequencing_callback();
        cm.sequencing_callback();
        assert_eq!(cm.hold_state(), HoldState::Off);
        assert_eq!(cm.cycle_state(), CycleState::Homing);
        assert_eq!(cm.combined_state(), CombinedState::Homing);

        let bank = switches(&cm, at);
        cm.homing_callback(&bank).unwrap();
        assert_eq!(cm.combined_state(), CombinedState::Homing);
        run_homing(&mut cm, at).unwrap();
        assert!(cm.is_homed(Axis::X));
        assert_eq!(cm.combined_state(), CombinedState::Ready);
    }

    #[test]
    fn homing_without_setting_coordinates() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G28_4).axis(Axis::X, 0.0)).unwrap();
        let mut at = [None; AXES];
        at[Axis::X.index()] = Some(-5.0);
        run_homing(&mut cm, at).unwrap();
        assert!(!cm.is_homed(Axis::X));
        assert_eq!(cm.homing_state(), HomingState::NotHomed);
        // ends at the zero backoff point just off the switch
        assert!(cm.absolute_position(View::Runtime, Axis::X) > -5.0);
        assert!(cm.absolute_position(View::Runtime, Axis::X) < 0.0);
    }

    #[test]
    fn missing_switch_raises_alarm() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::X, 0.0)).unwrap();
        let err = run_homing(&mut cm, [None; AXES]);
        assert_eq!(err, Err(CmError::Fault(Fault::HomingSwitchNotFound)));
        assert_eq!(cm.combined_state(), CombinedState::Alarm);
        assert!(cm.homing_cycle().is_none());
        assert!(!cm.is_homed(Axis::X));
    }

    #[test]
    fn switch_closed_at_start_raises_alarm() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::Y, 0.0)).unwrap();
        let mut at = [None; AXES];
        at[Axis::Y.index()] = Some(10.0);
        assert_eq!(run_homing(&mut cm, at), Err(CmError::Fault(Fault::HomingSwitchClosedAtStart)));
        assert!(cm.status().is_alarmed());
    }

    #[test]
    fn axes_that_cannot_home_are_rejected() {
        let mut cm = homing_machine();
        let err = cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::A, 0.0));
        assert_eq!(err, Err(CmError::ParameterOutOfRange("no requested axis can home")));
        assert_eq!(cm.combined_state(), CombinedState::Ready);
    }

    #[test]
    fn blocks_are_refused_while_homing() {
        let mut cm = homing_machine();
        cm.execute_block(&Block::new().code(Code::G28_2).axis(Axis::X, 0.0)).unwrap();
        let err = cm.execute_block(&Block::new().code(Code::G0).axis(Axis::Y, 1.0));
        assert!(matches!(err, Err(CmError::IllegalInState(_))));
    }
}
