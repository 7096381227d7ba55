//! Feedhold, queue flush and cycle start.
//!
//! Requests come from the communication layer as flags that any thread may
//! raise; only `sequencing_callback` on the control thread lowers them. Each
//! callback advances the hold state by at most one step:
//!
//! ```text
//! Off -> Sync -> Plan -> Decel -> Hold -> EndHold -> Off
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CmError, Result};
use crate::machine::CanonicalMachine;
use crate::planner::MotionPlanner;
use crate::state::{CycleState, HoldState, MachineState, MotionState};

#[derive(Debug, Default)]
pub struct RequestFlags {
    feedhold: AtomicBool,
    queue_flush: AtomicBool,
    cycle_start: AtomicBool,
}

impl RequestFlags {
    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::AcqRel)
    }

    fn pending(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.feedhold.store(false, Ordering::Release);
        self.queue_flush.store(false, Ordering::Release);
        self.cycle_start.store(false, Ordering::Release);
    }
}

/// Producer side of the request flags.
#[derive(Debug, Clone)]
pub struct RequestHandle(Arc<RequestFlags>);

impl RequestHandle {
    pub(crate) fn new(flags: Arc<RequestFlags>) -> Self {
        Self(flags)
    }

    pub fn request_feedhold(&self) {
        self.0.feedhold.store(true, Ordering::Release);
    }

    pub fn request_queue_flush(&self) {
        self.0.queue_flush.store(true, Ordering::Release);
    }

    pub fn request_cycle_start(&self) {
        self.0.cycle_start.store(true, Ordering::Release);
    }
}

impl<P: MotionPlanner> CanonicalMachine<P> {
    pub fn request_feedhold(&self) {
        self.requests().request_feedhold();
    }

    pub fn request_queue_flush(&self) {
        self.requests().request_queue_flush();
    }

    pub fn request_cycle_start(&self) {
        self.requests().request_cycle_start();
    }

    /// Service pending requests and runtime events. Called once per control
    /// loop iteration; never blocks.
    pub fn sequencing_callback(&mut self) {
        while let Some(event) = self.planner.take_event() {
            self.handle_runtime_event(event);
        }
        if self.status.is_alarmed() {
            self.requests.clear();
            return;
        }

        // consumed either way, so a stale request cannot hold a later move
        if RequestFlags::take(&self.requests.feedhold) {
            if self.begin_feedhold() {
                return;
            }
            log::debug!("feedhold request ignored in {:?}", self.status.combined());
        }

        match self.hold_state {
            HoldState::Sync => {
                if self.planner.segment_boundary() {
                    self.set_hold_state(HoldState::Plan);
                }
                return;
            }
            HoldState::Plan => {
                self.planner.plan_hold();
                self.set_hold_state(HoldState::Decel);
                return;
            }
            HoldState::Decel => {
                if self.planner.hold_reached() {
                    self.set_hold_state(HoldState::Hold);
                }
                return;
            }
            HoldState::EndHold => {
                self.end_hold();
                return;
            }
            HoldState::Off | HoldState::Hold => {}
        }

        if RequestFlags::pending(&self.requests.queue_flush) {
            if !self.can_flush() {
                return;
            }
            RequestFlags::take(&self.requests.queue_flush);
            self.flush_queue();
            return;
        }

        if RequestFlags::take(&self.requests.cycle_start) {
            if self.hold_state == HoldState::Hold {
                self.set_hold_state(HoldState::EndHold);
            } else if self.planner.is_busy() {
                // release a runtime parked at a program stop
                self.planner.resume();
                self.begin_machining_cycle();
            }
        }
    }

    /// Direct feedhold. Returns false when there is no motion to hold.
    pub fn feedhold(&mut self) -> bool {
        self.begin_feedhold()
    }

    fn begin_feedhold(&mut self) -> bool {
        if self.status.motion() != MotionState::Run || self.hold_state != HoldState::Off {
            return false;
        }
        self.status.set_motion(MotionState::Hold);
        self.set_hold_state(HoldState::Sync);
        true
    }

    fn set_hold_state(&mut self, next: HoldState) {
        log::debug!("hold {:?} -> {:?}", self.hold_state, next);
        self.hold_state = next;
    }

    fn can_flush(&self) -> bool {
        self.hold_state == HoldState::Hold
            || (self.hold_state == HoldState::Off
                && self.status.motion() == MotionState::Stop
                && !self.planner.runtime_busy())
    }

    /// Direct queue flush, legal only while held or stopped.
    pub fn queue_flush(&mut self) -> Result<()> {
        if !self.can_flush() {
            return Err(CmError::IllegalInState("queue flush while moving"));
        }
        self.flush_queue();
        Ok(())
    }

    fn flush_queue(&mut self) {
        self.planner.flush();
        self.sync_position_to_runtime();
        self.abandon_cycles();
        if self.hold_state == HoldState::Hold {
            self.flush_pending_stop = true;
            self.set_hold_state(HoldState::EndHold);
        } else if self.status.in_cycle() {
            self.status.program_finalize(MachineState::ProgramStop);
        }
        console_log!("queue flushed");
    }

    /// Leave the hold: resume queued motion, or finalize when nothing is
    /// left to run. Homing and probing end their own cycles.
    fn end_hold(&mut self) {
        self.set_hold_state(HoldState::Off);
        if std::mem::take(&mut self.flush_pending_stop) {
            self.status.program_finalize(MachineState::ProgramStop);
            return;
        }
        self.planner.resume();
        if self.planner.is_busy() || self.status.cycle() != CycleState::Machining {
            self.status.set_motion(MotionState::Run);
        } else {
            self.status.cycle_end();
        }
    }
}
