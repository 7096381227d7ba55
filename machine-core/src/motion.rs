//! Straight and arc moves: resolve the target, time the move, stage it for
//! the planner and advance the model position.

use std::f64::consts::{PI, TAU};

use crate::axis::AXES;
use crate::error::{CmError, Result};
use crate::gcode::{MotionMode, ProgramFlow};
use crate::machine::CanonicalMachine;
use crate::offsets::AxisWords;
use crate::planner::{ArcParams, MotionPlanner, PlannerBlock};
use crate::timing;

// center-format arcs may miss the circle by this much at the end point (mm)
const ARC_RADIUS_TOLERANCE: f64 = 0.05;

impl<P: MotionPlanner> CanonicalMachine<P> {
    // G0
    pub fn straight_traverse(&mut self, target: &AxisWords) -> Result<()> {
        self.transaction(|cm| {
            cm.require_motion_allowed()?;
            cm.gm.motion_mode = MotionMode::StraightTraverse;
            cm.set_model_target(target)?;
            cm.queue_move()
        })
    }

    // G1
    pub fn straight_feed(&mut self, target: &AxisWords) -> Result<()> {
        self.transaction(|cm| {
            cm.require_motion_allowed()?;
            cm.gm.motion_mode = MotionMode::StraightFeed;
            cm.require_feed_rate()?;
            cm.set_model_target(target)?;
            cm.queue_move()
        })
    }

    fn require_feed_rate(&self) -> Result<()> {
        let missing = if self.gm.inverse_feed_rate_mode {
            self.gmx.inverse_feed_rate <= 0.0
        } else {
            self.gm.feed_rate <= 0.0
        };
        if missing {
            return Err(CmError::ParameterOutOfRange("feed rate not set"));
        }
        Ok(())
    }

    /// Queue a line to the already resolved model target. Zero-length moves
    /// are dropped.
    pub(crate) fn queue_move(&mut self) -> Result<()> {
        if self.gm.target == self.gmx.position {
            return Ok(());
        }
        self.set_work_offsets();
        let times = timing::move_times(
            &self.gm,
            &self.gmx.position,
            &self.config,
            &self.gmx.overrides,
            self.gmx.inverse_feed_rate,
        );
        self.gm.move_time = times.move_time;
        self.gm.minimum_time = times.minimum_time;
        self.gmx.program_flow = ProgramFlow::Running;
        self.emit(PlannerBlock::Line(self.gm))?;
        self.gmx.position = self.gm.target;
        Ok(())
    }

    /// Feed move in machine coordinates for the homing and probing cycles.
    pub(crate) fn queue_cycle_move(&mut self, target: [f64; AXES], feed_rate: f64, mode: MotionMode) -> Result<()> {
        self.transaction(|cm| {
            cm.gm.motion_mode = mode;
            cm.gm.inverse_feed_rate_mode = false;
            cm.gm.feed_rate = feed_rate;
            cm.gm.target = target;
            cm.queue_move()
        })
    }

    /// G2 / G3. `offset` is IJK relative to the start point, `radius` is R;
    /// a negative R asks for the arc longer than half a turn. An end point
    /// equal to the start point in center format is a full circle.
    pub fn arc_feed(
        &mut self,
        target: &AxisWords,
        offset: &[Option<f64>; 3],
        radius: Option<f64>,
        clockwise: bool,
    ) -> Result<()> {
        self.transaction(|cm| {
            cm.require_motion_allowed()?;
            cm.gm.motion_mode = if clockwise { MotionMode::CwArc } else { MotionMode::CcwArc };
            cm.require_feed_rate()?;
            cm.set_model_target(target)?;

            let units = cm.gm.units_mode;
            let [a0, a1, a2] = cm.gm.select_plane.axes();
            let start = cm.gmx.position;
            let end = cm.gm.target;
            let from = (start[a0], start[a1]);
            let to = (end[a0], end[a1]);

            let center = match radius {
                Some(r) => arc_center_from_radius(from, to, units.to_millimeters(r), clockwise)?,
                None => {
                    if offset[a0].is_none() && offset[a1].is_none() {
                        return Err(CmError::ParameterOutOfRange("arc offsets missing for the selected plane"));
                    }
                    let i = units.to_millimeters(offset[a0].unwrap_or(0.0));
                    let j = units.to_millimeters(offset[a1].unwrap_or(0.0));
                    (from.0 + i, from.1 + j)
                }
            };

            let r = (from.0 - center.0).hypot(from.1 - center.1);
            if r <= 1e-9 {
                return Err(CmError::ParameterOutOfRange("arc radius is zero"));
            }
            if radius.is_none() {
                let r_end = (to.0 - center.0).hypot(to.1 - center.1);
                if (r_end - r).abs() > ARC_RADIUS_TOLERANCE.max(r * 1e-3) {
                    return Err(CmError::ParameterOutOfRange("arc end point is not on the arc"));
                }
            }

            let sweep = arc_sweep(from, to, center, clockwise);
            let length = (r * sweep).hypot(end[a2] - start[a2]);

            let mut arc_offset = [0.0; 3];
            arc_offset[a0] = center.0 - from.0;
            arc_offset[a1] = center.1 - from.1;
            cm.gmx.arc_offset = arc_offset;
            cm.gmx.arc_radius = r;
            let params = ArcParams {
                offset: arc_offset,
                radius: radius.map_or(0.0, |_| r),
                plane: cm.gm.select_plane,
                clockwise,
            };

            cm.set_work_offsets();
            // axis limits from the chord, programmed time from the true path
            let times = timing::move_times(
                &cm.gm,
                &cm.gmx.position,
                &cm.config,
                &cm.gmx.overrides,
                cm.gmx.inverse_feed_rate,
            );
            let programmed = if cm.gm.inverse_feed_rate_mode {
                1.0 / (cm.gmx.inverse_feed_rate * cm.gmx.overrides.feed_factor())
            } else {
                length / (cm.gm.feed_rate * cm.gmx.overrides.feed_factor())
            };
            cm.gm.move_time = times.move_time.max(programmed);
            cm.gm.minimum_time = times.minimum_time;
            cm.gmx.program_flow = ProgramFlow::Running;
            cm.emit(PlannerBlock::Arc(cm.gm, params))?;
            cm.gmx.position = cm.gm.target;
            Ok(())
        })
    }
}

/// Angle swept going from `from` to `to` around `center` in the given
/// direction, in (0, 2pi].
fn arc_sweep(from: (f64, f64), to: (f64, f64), center: (f64, f64), clockwise: bool) -> f64 {
    let a0 = (from.1 - center.1).atan2(from.0 - center.0);
    let a1 = (to.1 - center.1).atan2(to.0 - center.0);
    let mut da = a1 - a0;
    if clockwise {
        if da >= 0.0 {
            da -= TAU;
        }
    } else if da <= 0.0 {
        da += TAU;
    }
    da.abs()
}

fn arc_center_from_radius(from: (f64, f64), to: (f64, f64), radius: f64, clockwise: bool) -> Result<(f64, f64)> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let chord = dx.hypot(dy);
    if chord <= 1e-9 {
        return Err(CmError::ParameterOutOfRange("radius arc needs an end point in the plane"));
    }
    let r = radius.abs();
    if chord > 2.0 * r + 1e-9 {
        return Err(CmError::ParameterOutOfRange("arc radius too small for end point"));
    }

    let mx = (from.0 + to.0) * 0.5;
    let my = (from.1 + to.1) * 0.5;
    let h = (r * r - (chord * 0.5) * (chord * 0.5)).max(0.0).sqrt();

    // unit perpendicular to chord
    let ux = -dy / chord;
    let uy = dx / chord;
    let c1 = (mx + ux * h, my + uy * h);
    let c2 = (mx - ux * h, my - uy * h);

    let sweep = arc_sweep(from, to, c1, clockwise);
    let c1_is_large = sweep >= PI - 1e-9;
    let c1_is_small = sweep <= PI + 1e-9;
    let matches = if radius < 0.0 { c1_is_large } else { c1_is_small };
    Ok(if matches { c1 } else { c2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::block::Block;
    use crate::config::MachineConfig;
    use crate::machine::tests::{approx_eq, machine};
    use crate::machine::View;
    use crate::modal::Code;
    use crate::planner::QueuePlanner;

    fn slow_axes() -> CanonicalMachine<QueuePlanner> {
        let mut cfg = MachineConfig::default();
        for ax in cfg.axes.iter_mut() {
            ax.jerk_max = 0.0;
        }
        CanonicalMachine::new(cfg, QueuePlanner::new())
    }

    fn last_block(cm: &CanonicalMachine<QueuePlanner>) -> PlannerBlock {
        *cm.planner().queued_blocks().last().expect("a queued block")
    }

    #[test]
    fn sweep_direction() {
        approx_eq(arc_sweep((1.0, 0.0), (0.0, 1.0), (0.0, 0.0), false), PI / 2.0);
        approx_eq(arc_sweep((1.0, 0.0), (0.0, 1.0), (0.0, 0.0), true), 3.0 * PI / 2.0);
        approx_eq(arc_sweep((1.0, 0.0), (1.0, 0.0), (0.0, 0.0), true), TAU);
    }

    #[test]
    fn radius_sign_picks_short_or_long_arc() {
        let short = arc_center_from_radius((0.0, 0.0), (10.0, 0.0), 10.0, true).unwrap();
        let long = arc_center_from_radius((0.0, 0.0), (10.0, 0.0), -10.0, true).unwrap();
        assert!(arc_sweep((0.0, 0.0), (10.0, 0.0), short, true) < PI);
        assert!(arc_sweep((0.0, 0.0), (10.0, 0.0), long, true) > PI);
    }

    #[test]
    fn radius_arc_is_timed_along_the_path() {
        let mut cm = slow_axes();
        cm.execute_block(&Block::new().code(Code::G2).axis(Axis::X, 10.0).radius(5.0).feed(600.0)).unwrap();
        let PlannerBlock::Arc(gm, params) = last_block(&cm) else { panic!("expected an arc") };
        approx_eq(params.offset[0], 5.0);
        approx_eq(params.offset[1], 0.0);
        approx_eq(gm.move_time, 5.0 * PI / 600.0);
        approx_eq(cm.absolute_position(View::Model, Axis::X), 10.0);
    }

    #[test]
    fn full_circle_in_center_format() {
        let mut cm = slow_axes();
        let block = Block::new().code(Code::G3).axis(Axis::X, 0.0).ijk(Some(5.0), None, None).feed(600.0);
        cm.execute_block(&block).unwrap();
        let PlannerBlock::Arc(gm, _) = last_block(&cm) else { panic!("expected an arc") };
        approx_eq(gm.move_time, 10.0 * PI / 600.0);
    }

    #[test]
    fn bad_arcs_are_rejected() {
        let mut cm = machine();
        let too_small = Block::new().code(Code::G2).axis(Axis::X, 20.0).radius(5.0).feed(600.0);
        assert_eq!(
            cm.execute_block(&too_small),
            Err(CmError::ParameterOutOfRange("arc radius too small for end point"))
        );
        let off_circle = Block::new().code(Code::G2).axis(Axis::X, 10.0).axis(Axis::Y, 5.0).ijk(Some(5.0), None, None).feed(600.0);
        assert_eq!(cm.execute_block(&off_circle), Err(CmError::ParameterOutOfRange("arc end point is not on the arc")));
        let wrong_plane = Block::new().code(Code::G18).code(Code::G2).axis(Axis::X, 10.0).ijk(None, Some(5.0), None).feed(600.0);
        assert_eq!(
            cm.execute_block(&wrong_plane),
            Err(CmError::ParameterOutOfRange("arc offsets missing for the selected plane"))
        );
        assert_eq!(cm.planner().queued(), 0);
    }

    #[test]
    fn zero_length_moves_are_dropped() {
        let mut cm = machine();
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 0.0).feed(100.0)).unwrap();
        assert_eq!(cm.planner().queued(), 0);
        assert_eq!(cm.snapshot().motion_mode, MotionMode::StraightFeed);
    }

    #[test]
    fn inverse_time_feed() {
        let mut cm = slow_axes();
        cm.execute_block(&Block::new().code(Code::G93).code(Code::G1).axis(Axis::X, 1.0).feed(4.0)).unwrap();
        let PlannerBlock::Line(gm) = last_block(&cm) else { panic!("expected a line") };
        approx_eq(gm.move_time, 0.25);
    }

    #[test]
    fn traverse_uses_machine_limits() {
        let mut cm = slow_axes();
        cm.execute_block(&Block::new().code(Code::G0).axis(Axis::X, 160.0)).unwrap();
        let PlannerBlock::Line(gm) = last_block(&cm) else { panic!("expected a line") };
        approx_eq(gm.move_time, 0.01);
        assert_eq!(gm.motion_mode, MotionMode::StraightTraverse);
    }
}
