//! Straight probe (G38.2). A probe that finds nothing is a normal outcome
//! reported through `probe_result`, not a fault.

use serde::Serialize;

use crate::axis::AXES;
use crate::error::{CmError, Result};
use crate::gcode::MotionMode;
use crate::homing::CycleProgress;
use crate::machine::{CanonicalMachine, SavedModal};
use crate::offsets::AxisWords;
use crate::planner::MotionPlanner;
use crate::state::{CycleState, HoldState};
use crate::switches::SwitchInputs;

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub contact: bool,
    /// Where motion stopped, machine coordinates.
    pub position: [f64; AXES],
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    Start,
    Probing,
}

#[derive(Debug, Clone)]
pub struct ProbeCycle {
    target: [f64; AXES],
    feed_rate: f64,
    phase: ProbePhase,
    pub(crate) saved: SavedModal,
}

impl ProbeCycle {
    pub fn phase(&self) -> ProbePhase {
        self.phase
    }

    pub fn advance<P: MotionPlanner>(
        &mut self,
        cm: &mut CanonicalMachine<P>,
        switches: &impl SwitchInputs,
    ) -> Result<CycleProgress> {
        let contact = switches.probe_switch();
        match self.phase {
            ProbePhase::Start => {
                if contact {
                    // already touching, nothing can be measured
                    cm.probe_result = Some(ProbeResult { contact: false, position: cm.gmx.position });
                    return Ok(CycleProgress::Done);
                }
                cm.queue_cycle_move(self.target, self.feed_rate, MotionMode::StraightProbe)?;
                self.phase = ProbePhase::Probing;
                Ok(CycleProgress::Running)
            }
            ProbePhase::Probing => {
                if contact {
                    cm.halt_at_contact();
                    cm.probe_result = Some(ProbeResult { contact: true, position: cm.gmx.position });
                    Ok(CycleProgress::Done)
                } else if !cm.planner.is_busy() {
                    cm.probe_result = Some(ProbeResult { contact: false, position: cm.gmx.position });
                    Ok(CycleProgress::Done)
                } else {
                    Ok(CycleProgress::Running)
                }
            }
        }
    }
}

impl<P: MotionPlanner> CanonicalMachine<P> {
    /// G38.2 toward `target` at the model feed rate.
    pub fn probe_cycle_start(&mut self, target: &AxisWords) -> Result<()> {
        self.require_motion_allowed()?;
        if self.status.in_cycle() || self.planner.is_busy() {
            return Err(CmError::IllegalInState("probing needs an idle machine"));
        }
        if target.iter().all(Option::is_none) {
            return Err(CmError::ParameterOutOfRange("probe needs an axis word"));
        }
        if self.gm.inverse_feed_rate_mode || self.gm.feed_rate <= 0.0 {
            return Err(CmError::ParameterOutOfRange("feed rate not set"));
        }

        self.set_model_target(target)?;
        let resolved = self.gm.target;
        self.gm.target = self.gmx.position;
        if resolved == self.gmx.position {
            return Err(CmError::ParameterOutOfRange("probe target is the current position"));
        }
        if !self.status.cycle_start(CycleState::Probe) {
            return Err(CmError::IllegalInState("probing needs an idle machine"));
        }

        self.planner.resume();
        self.probe_result = None;
        self.probe = Some(ProbeCycle {
            target: resolved,
            feed_rate: self.gm.feed_rate,
            phase: ProbePhase::Start,
            saved: SavedModal::save(&self.gm),
        });
        Ok(())
    }

    pub fn probe_cycle(&self) -> Option<&ProbeCycle> {
        self.probe.as_ref()
    }

    /// Outcome of the last finished probe, `None` while one is running.
    pub fn probe_result(&self) -> Option<ProbeResult> {
        self.probe_result
    }

    pub fn probe_callback(&mut self, switches: &impl SwitchInputs) -> Result<CycleProgress> {
        let Some(mut cycle) = self.probe.take() else {
            return Ok(CycleProgress::Idle);
        };
        if self.hold_state != HoldState::Off {
            self.probe = Some(cycle);
            return Ok(CycleProgress::Running);
        }
        match cycle.advance(self, switches) {
            Ok(CycleProgress::Done) => {
                cycle.saved.restore(&mut self.gm);
                self.set_work_offsets();
                self.status.cycle_end();
                if let Some(result) = self.probe_result {
                    console_log!("probe {}", if result.contact { "contact" } else { "no contact" });
                }
                Ok(CycleProgress::Done)
            }
            Ok(progress) => {
                self.probe = Some(cycle);
                Ok(progress)
            }
            Err(err) => {
                cycle.saved.restore(&mut self.gm);
                self.set_work_offsets();
                self.status.cycle_end();
                Err(err)
            }
        }
    }
}
