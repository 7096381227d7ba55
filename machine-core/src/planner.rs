//! The seam between the canonical machine and the motion planner / runtime.
//!
//! Blocks cross the seam by value: every `PlannerBlock` owns its own copy of
//! the canonical state, and the runtime copies it again when the block starts
//! executing. `QueuePlanner` is an in-memory reference implementation that
//! executes blocks by interpolating over their computed move time. It does
//! not generate segments, plan velocity profiles or expand arcs.

use std::collections::VecDeque;

use serde::Serialize;

use crate::axis::AXES;
use crate::gcode::{GCodeState, Plane};

/// Synchronous commands executed in queue order.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Spindle,
    Coolant,
    ToolChange,
    ProgramStop,
    ProgramEnd,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct ArcParams {
    pub offset: [f64; 3], // IJK in mm, relative to the start point
    pub radius: f64,      // 0 when the arc is given by offsets
    pub plane: Plane,
    pub clockwise: bool,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub enum PlannerBlock {
    Line(GCodeState),
    Arc(GCodeState, ArcParams),
    Dwell(GCodeState),
    Command(GCodeState, Command),
}

impl PlannerBlock {
    pub fn state(&self) -> &GCodeState {
        match self {
            PlannerBlock::Line(gm) | PlannerBlock::Arc(gm, _) | PlannerBlock::Dwell(gm) | PlannerBlock::Command(gm, _) => gm,
        }
    }
}

/// Things the runtime reports back to the canonical machine.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    ProgramStop,
    ProgramEnd,
    /// All queued work has executed.
    QueueEmpty,
}

pub trait MotionPlanner {
    /// Free slots in the planner queue.
    fn available(&self) -> usize;
    fn queue(&mut self, block: PlannerBlock);
    /// Discard every block that has not finished executing.
    fn flush(&mut self);
    /// Stop at once (switch contact) and discard the rest of the queue.
    fn halt(&mut self);
    /// Blocks are queued or executing.
    fn is_busy(&self) -> bool;
    /// The runtime is producing motion right now.
    fn runtime_busy(&self) -> bool;
    /// Parked at a program stop. Only a cycle start releases it.
    fn parked(&self) -> bool;
    /// Tool velocity in mm/min, 0 while stopped or held.
    fn runtime_velocity(&self) -> f64;
    fn runtime_position(&self) -> [f64; AXES];
    /// Redefine where the machine is. Only meaningful while idle.
    fn set_runtime_position(&mut self, position: [f64; AXES]);
    fn runtime_state(&self) -> &GCodeState;
    /// State of the most recently queued block still waiting to run.
    fn planning_state(&self) -> Option<&GCodeState>;

    // feedhold support
    fn segment_boundary(&self) -> bool;
    fn plan_hold(&mut self);
    fn hold_reached(&self) -> bool;
    fn resume(&mut self);

    fn take_event(&mut self) -> Option<RuntimeEvent>;
}

pub const PLANNER_QUEUE_SIZE: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldProgress {
    None,
    Decelerating,
    Held,
}

#[derive(Debug, Clone, Copy)]
struct RuntimeBlock {
    block: PlannerBlock,
    start: [f64; AXES],
    elapsed_ms: f64,
    duration_ms: f64,
}

/// Reference planner and runtime driven by `tick`.
#[derive(Debug)]
pub struct QueuePlanner {
    queue: VecDeque<PlannerBlock>,
    capacity: usize,
    current: Option<RuntimeBlock>,
    runtime: GCodeState,
    position: [f64; AXES],
    hold: HoldProgress,
    stopped: bool, // parked at a program stop until resumed
    ran: bool,
    velocity: f64,
    events: VecDeque<RuntimeEvent>,
}

impl Default for QueuePlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuePlanner {
    pub fn new() -> Self {
        Self::with_capacity(PLANNER_QUEUE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            current: None,
            runtime: GCodeState::default(),
            position: [0.0; AXES],
            hold: HoldProgress::None,
            stopped: false,
            ran: false,
            velocity: 0.0,
            events: VecDeque::new(),
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_blocks(&self) -> impl Iterator<Item = &PlannerBlock> {
        self.queue.iter()
    }

    /// Advance the runtime by `dt_ms` milliseconds.
    pub fn tick(&mut self, dt_ms: f64) {
        if dt_ms <= 0.0 {
            return;
        }
        match self.hold {
            // deceleration takes one tick in this runtime
            HoldProgress::Decelerating => {
                self.hold = HoldProgress::Held;
                self.velocity = 0.0;
                return;
            }
            HoldProgress::Held => return,
            HoldProgress::None => {}
        }

        let from = self.position;
        let mut budget = dt_ms;
        while budget > 0.0 && !self.stopped {
            if self.current.is_none() && !self.start_next() {
                break;
            }
            let Some(rt) = self.current.as_mut() else { break };
            let remaining = (rt.duration_ms - rt.elapsed_ms).max(0.0);
            let step = remaining.min(budget);
            rt.elapsed_ms += step;
            budget -= step;

            if let PlannerBlock::Line(gm) | PlannerBlock::Arc(gm, _) = rt.block {
                let frac = if rt.duration_ms > 0.0 { (rt.elapsed_ms / rt.duration_ms).min(1.0) } else { 1.0 };
                for i in 0..AXES {
                    self.position[i] = rt.start[i] + (gm.target[i] - rt.start[i]) * frac;
                }
            }

            if rt.elapsed_ms >= rt.duration_ms {
                let done = rt.block;
                self.current = None;
                self.finish(done);
            }
        }

        self.velocity = path_length(&from, &self.position) / dt_ms * 60_000.0;

        if self.ran && self.current.is_none() && self.queue.is_empty() {
            self.ran = false;
            self.events.push_back(RuntimeEvent::QueueEmpty);
        }
    }

    fn start_next(&mut self) -> bool {
        let Some(block) = self.queue.pop_front() else {
            return false;
        };
        self.runtime = *block.state();
        let duration_ms = match block {
            PlannerBlock::Line(gm) | PlannerBlock::Arc(gm, _) => gm.move_time * 60_000.0,
            PlannerBlock::Dwell(gm) => gm.parameter * 1_000.0,
            PlannerBlock::Command(..) => 0.0,
        };
        self.current = Some(RuntimeBlock { block, start: self.position, elapsed_ms: 0.0, duration_ms });
        self.ran = true;
        true
    }

    fn finish(&mut self, block: PlannerBlock) {
        match block {
            PlannerBlock::Line(gm) | PlannerBlock::Arc(gm, _) => self.position = gm.target,
            PlannerBlock::Command(_, Command::ProgramStop) => {
                self.stopped = true;
                self.events.push_back(RuntimeEvent::ProgramStop);
            }
            PlannerBlock::Command(_, Command::ProgramEnd) => {
                self.events.push_back(RuntimeEvent::ProgramEnd);
            }
            _ => {}
        }
    }
}

/// XYZ distance, or ABC distance for a pure rotary move.
fn path_length(from: &[f64; AXES], to: &[f64; AXES]) -> f64 {
    let dist = |range: std::ops::Range<usize>| range.map(|i| (to[i] - from[i]).powi(2)).sum::<f64>().sqrt();
    let xyz = dist(0..3);
    if xyz > 0.0 { xyz } else { dist(3..AXES) }
}

impl MotionPlanner for QueuePlanner {
    fn available(&self) -> usize {
        self.capacity.saturating_sub(self.queue.len())
    }

    fn queue(&mut self, block: PlannerBlock) {
        self.queue.push_back(block);
    }

    fn flush(&mut self) {
        self.queue.clear();
        self.current = None;
        self.hold = HoldProgress::None;
        self.stopped = false;
        self.ran = false;
        self.velocity = 0.0;
    }

    fn halt(&mut self) {
        self.flush();
        self.events.clear();
    }

    fn is_busy(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    fn runtime_busy(&self) -> bool {
        self.current.is_some() && self.hold != HoldProgress::Held && !self.stopped
    }

    fn parked(&self) -> bool {
        self.stopped
    }

    fn runtime_velocity(&self) -> f64 {
        self.velocity
    }

    fn runtime_position(&self) -> [f64; AXES] {
        self.position
    }

    fn set_runtime_position(&mut self, position: [f64; AXES]) {
        self.position = position;
        self.runtime.target = position;
    }

    fn runtime_state(&self) -> &GCodeState {
        &self.runtime
    }

    fn planning_state(&self) -> Option<&GCodeState> {
        self.queue.back().map(PlannerBlock::state)
    }

    fn segment_boundary(&self) -> bool {
        // ticks are atomic, so every call lands between segments
        true
    }

    fn plan_hold(&mut self) {
        if self.hold == HoldProgress::None {
            self.hold = HoldProgress::Decelerating;
        }
    }

    fn hold_reached(&self) -> bool {
        self.hold == HoldProgress::Held
    }

    fn resume(&mut self) {
        self.hold = HoldProgress::None;
        self.stopped = false;
    }

    fn take_event(&mut self) -> Option<RuntimeEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::MotionMode;

    fn approx_eq(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-6, "expected {:.6}, got {:.6}", b, a);
    }

    fn line(x: f64, minutes: f64) -> PlannerBlock {
        let mut gm = GCodeState { motion_mode: MotionMode::StraightFeed, move_time: minutes, ..GCodeState::default() };
        gm.target[0] = x;
        PlannerBlock::Line(gm)
    }

    #[test]
    fn runtime_interpolates_and_reports_drain() {
        let mut p = QueuePlanner::new();
        p.queue(line(10.0, 1.0 / 60.0)); // one second
        p.tick(500.0);
        approx_eq(p.runtime_position()[0], 5.0);
        assert!(p.runtime_busy());
        assert_eq!(p.take_event(), None);
        p.tick(600.0);
        approx_eq(p.runtime_position()[0], 10.0);
        assert!(!p.is_busy());
        assert_eq!(p.take_event(), Some(RuntimeEvent::QueueEmpty));
        assert_eq!(p.take_event(), None);
    }

    #[test]
    fn hold_stops_motion_until_resume() {
        let mut p = QueuePlanner::new();
        p.queue(line(10.0, 1.0 / 60.0));
        p.tick(200.0);
        p.plan_hold();
        assert!(!p.hold_reached());
        p.tick(10.0);
        assert!(p.hold_reached());
        let held_at = p.runtime_position()[0];
        p.tick(500.0);
        approx_eq(p.runtime_position()[0], held_at);
        assert!(!p.runtime_busy());
        p.resume();
        p.tick(2_000.0);
        approx_eq(p.runtime_position()[0], 10.0);
    }

    #[test]
    fn program_stop_parks_the_runtime() {
        let mut p = QueuePlanner::new();
        p.queue(PlannerBlock::Command(GCodeState::default(), Command::ProgramStop));
        p.queue(line(3.0, 0.0));
        p.tick(1.0);
        assert_eq!(p.take_event(), Some(RuntimeEvent::ProgramStop));
        assert_eq!(p.queued(), 1);
        p.resume();
        p.tick(1.0);
        approx_eq(p.runtime_position()[0], 3.0);
    }

    #[test]
    fn velocity_follows_the_running_block() {
        let mut p = QueuePlanner::new();
        p.queue(line(10.0, 1.0 / 60.0));
        p.tick(100.0);
        approx_eq(p.runtime_velocity(), 600.0);
        p.plan_hold();
        p.tick(10.0);
        approx_eq(p.runtime_velocity(), 0.0);
        p.resume();
        p.tick(2_000.0);
        // 9 mm left, covered within the 2 s tick
        approx_eq(p.runtime_velocity(), 270.0);
        p.tick(10.0);
        approx_eq(p.runtime_velocity(), 0.0);
    }

    #[test]
    fn program_stop_parks_until_resumed() {
        let mut p = QueuePlanner::new();
        p.queue(PlannerBlock::Command(GCodeState::default(), Command::ProgramStop));
        p.tick(1.0);
        assert!(p.parked());
        p.resume();
        assert!(!p.parked());
    }

    #[test]
    fn flush_keeps_position_and_drops_queue() {
        let mut p = QueuePlanner::with_capacity(2);
        p.queue(line(10.0, 1.0 / 60.0));
        p.queue(line(20.0, 1.0 / 60.0));
        assert_eq!(p.available(), 0);
        p.tick(500.0);
        p.flush();
        assert!(!p.is_busy());
        approx_eq(p.runtime_position()[0], 5.0);
        assert_eq!(p.available(), 2);
    }
}
