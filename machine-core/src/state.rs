//! Machine / cycle / motion state machine and the derived combined state.
//!
//! Only the transitions on `MachineStatus` can change the triple, so the set of
//! reachable triples is closed:
//!
//! ```text
//! MACHINE        CYCLE       MOTION          COMBINED
//! Initializing   Off         Stop            Initializing
//! Ready          Off         Stop            Ready
//! Alarm          Off         Stop            Alarm
//! ProgramStop    Off         Stop            ProgramStop
//! ProgramEnd     Off         Stop            ProgramEnd
//! Cycle          Machining   Run/Hold/Stop   Run/Hold/Cycle
//! Cycle          Probe       any             Probe
//! Cycle          Homing      any             Homing
//! Cycle          Jog         any             Jog
//! ```

use serde::{Deserialize, Serialize};

// Numeric values are reported through the keyed accessors; keep them stable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CombinedState {
    Initializing = 0,
    Ready,
    Alarm,
    ProgramStop,
    ProgramEnd,
    Run,
    Hold,
    Probe,
    Cycle,
    Homing,
    Jog,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MachineState {
    Initializing = 0,
    Ready,
    Alarm,
    ProgramStop,
    ProgramEnd,
    Cycle,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CycleState {
    Off = 0,
    Machining,
    Probe,
    Homing,
    Jog,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MotionState {
    Stop = 0,
    Run,
    Hold,
}

/// Feedhold sub-state. Advances monotonically and only returns to `Off`
/// through `EndHold`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum HoldState {
    #[default]
    Off = 0,
    Sync,    // wait for the in-flight segment boundary
    Plan,    // replan queued blocks to stop
    Decel,   // decelerating to the hold point
    Hold,    // holding
    EndHold, // transient, back to Off on the next advance
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HomingState {
    #[default]
    NotHomed = 0,
    Homed = 1,
}

/// The machine/cycle/motion triple.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineStatus {
    machine: MachineState,
    cycle: CycleState,
    motion: MotionState,
}

impl Default for MachineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineStatus {
    pub const fn new() -> Self {
        Self { machine: MachineState::Initializing, cycle: CycleState::Off, motion: MotionState::Stop }
    }

    pub fn machine(&self) -> MachineState {
        self.machine
    }

    pub fn cycle(&self) -> CycleState {
        self.cycle
    }

    pub fn motion(&self) -> MotionState {
        self.motion
    }

    pub fn combined(&self) -> CombinedState {
        match self.cycle {
            CycleState::Off => match self.machine {
                MachineState::Initializing => CombinedState::Initializing,
                MachineState::Ready => CombinedState::Ready,
                MachineState::Alarm => CombinedState::Alarm,
                MachineState::ProgramStop => CombinedState::ProgramStop,
                MachineState::ProgramEnd => CombinedState::ProgramEnd,
                // not reachable: a cycle always has a cycle state
                MachineState::Cycle => CombinedState::Cycle,
            },
            CycleState::Probe => CombinedState::Probe,
            CycleState::Homing => CombinedState::Homing,
            CycleState::Jog => CombinedState::Jog,
            CycleState::Machining => match self.motion {
                MotionState::Run => CombinedState::Run,
                MotionState::Hold => CombinedState::Hold,
                MotionState::Stop => CombinedState::Cycle,
            },
        }
    }

    pub fn is_alarmed(&self) -> bool {
        self.machine == MachineState::Alarm
    }

    pub fn in_cycle(&self) -> bool {
        self.machine == MachineState::Cycle
    }

    /// Initialization finished.
    pub fn ready(&mut self) -> bool {
        if self.machine != MachineState::Initializing {
            return false;
        }
        self.machine = MachineState::Ready;
        true
    }

    /// Enter a cycle of the given kind. A machining cycle may be entered from
    /// Ready, ProgramStop, ProgramEnd or an existing cycle; homing, probing and
    /// jogging need an idle machine.
    pub fn cycle_start(&mut self, kind: CycleState) -> bool {
        let allowed = match self.machine {
            MachineState::Ready | MachineState::ProgramStop | MachineState::ProgramEnd => true,
            MachineState::Cycle => kind == CycleState::Machining && self.cycle == CycleState::Machining,
            MachineState::Initializing | MachineState::Alarm => false,
        };
        if !allowed || kind == CycleState::Off {
            return false;
        }
        self.machine = MachineState::Cycle;
        self.cycle = kind;
        if self.motion == MotionState::Stop {
            self.motion = MotionState::Run;
        }
        true
    }

    /// Leave the cycle and return to Ready.
    pub fn cycle_end(&mut self) -> bool {
        if self.machine != MachineState::Cycle {
            return false;
        }
        self.machine = MachineState::Ready;
        self.cycle = CycleState::Off;
        self.motion = MotionState::Stop;
        true
    }

    /// Motion state change reported by the sequencer or the runtime. Ignored
    /// outside a cycle, where motion is always Stop.
    pub fn set_motion(&mut self, motion: MotionState) -> bool {
        if self.machine != MachineState::Cycle {
            return false;
        }
        self.motion = motion;
        true
    }

    /// Program stop (M0/M1) or end (M2/M30) reached. Legal only while Ready
    /// or in a cycle.
    pub fn program_finalize(&mut self, machine: MachineState) -> bool {
        debug_assert!(matches!(machine, MachineState::ProgramStop | MachineState::ProgramEnd));
        if !matches!(self.machine, MachineState::Ready | MachineState::Cycle) {
            return false;
        }
        self.machine = machine;
        self.cycle = CycleState::Off;
        self.motion = MotionState::Stop;
        true
    }

    pub fn alarm(&mut self) {
        self.machine = MachineState::Alarm;
        self.cycle = CycleState::Off;
        self.motion = MotionState::Stop;
    }

    /// Explicit external reset, the only way out of Alarm.
    pub fn reset(&mut self) {
        self.machine = MachineState::Ready;
        self.cycle = CycleState::Off;
        self.motion = MotionState::Stop;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Event {
        Ready,
        Start(CycleState),
        End,
        Motion(MotionState),
        Finalize(MachineState),
        Alarm,
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        let cycles = prop_oneof![
            Just(CycleState::Off),
            Just(CycleState::Machining),
            Just(CycleState::Probe),
            Just(CycleState::Homing),
            Just(CycleState::Jog),
        ];
        let motions = prop_oneof![Just(MotionState::Stop), Just(MotionState::Run), Just(MotionState::Hold)];
        let finals = prop_oneof![Just(MachineState::ProgramStop), Just(MachineState::ProgramEnd)];
        prop_oneof![
            Just(Event::Ready),
            cycles.prop_map(Event::Start),
            Just(Event::End),
            motions.prop_map(Event::Motion),
            finals.prop_map(Event::Finalize),
            Just(Event::Alarm),
        ]
    }

    fn table(s: &MachineStatus) -> Option<CombinedState> {
        use CombinedState as C;
        use CycleState as Cy;
        use MachineState as M;
        use MotionState as Mo;
        match (s.machine(), s.cycle(), s.motion()) {
            (M::Initializing, Cy::Off, Mo::Stop) => Some(C::Initializing),
            (M::Ready, Cy::Off, Mo::Stop) => Some(C::Ready),
            (M::Alarm, Cy::Off, Mo::Stop) => Some(C::Alarm),
            (M::ProgramStop, Cy::Off, Mo::Stop) => Some(C::ProgramStop),
            (M::ProgramEnd, Cy::Off, Mo::Stop) => Some(C::ProgramEnd),
            (M::Cycle, Cy::Machining, Mo::Run) => Some(C::Run),
            (M::Cycle, Cy::Machining, Mo::Hold) => Some(C::Hold),
            (M::Cycle, Cy::Machining, Mo::Stop) => Some(C::Cycle),
            (M::Cycle, Cy::Probe, _) => Some(C::Probe),
            (M::Cycle, Cy::Homing, _) => Some(C::Homing),
            (M::Cycle, Cy::Jog, _) => Some(C::Jog),
            _ => None,
        }
    }

    proptest! {
        #[test]
        fn only_table_triples_are_reachable(events in proptest::collection::vec(arb_event(), 1..200)) {
            let mut s = MachineStatus::new();
            let mut alarmed = false;
            for ev in events {
                match ev {
                    Event::Ready => { s.ready(); }
                    Event::Start(kind) => { s.cycle_start(kind); }
                    Event::End => { s.cycle_end(); }
                    Event::Motion(m) => { s.set_motion(m); }
                    Event::Finalize(m) => { s.program_finalize(m); }
                    Event::Alarm => { s.alarm(); alarmed = true; }
                }
                let expected = table(&s);
                prop_assert!(expected.is_some(), "unreachable triple reached: {:?}", s);
                prop_assert_eq!(Some(s.combined()), expected);
                if alarmed {
                    prop_assert_eq!(s.machine(), MachineState::Alarm);
                }
            }
        }
    }
}
