//! Coordinate systems, origin offsets and target resolution.
//!
//! Convention: WORK = MACHINE - OFFSET, with
//! OFFSET = coordinate system offset + G92 origin offset (when enabled),
//! or zero for the one block a G53 is in effect.

use std::f64::consts::PI;

use crate::axis::{Axis, AxisMode, AXES};
use crate::error::{CmError, Result};
use crate::gcode::{CoordSystem, DistanceMode, MotionMode, UnitsMode};
use crate::machine::{CanonicalMachine, View};
use crate::planner::MotionPlanner;

/// Words of one block addressed to the axes, in block units.
pub type AxisWords = [Option<f64>; AXES];

impl<P: MotionPlanner> CanonicalMachine<P> {
    // ── Offsets ───────────────────────────────────────────────────────────

    /// Offset currently applied to `axis`, in mm.
    pub fn active_coord_offset(&self, axis: Axis) -> f64 {
        let i = axis.index();
        if self.gm.absolute_override {
            return 0.0;
        }
        let mut offset = self.offsets[self.gm.coord_system.index()][i];
        if self.gmx.origin_offset_enable {
            offset += self.gmx.origin_offset[i];
        }
        offset
    }

    /// Cache the active offsets in the model so every downstream copy carries
    /// them. Called whenever anything that feeds them changes.
    pub fn set_work_offsets(&mut self) {
        for axis in Axis::ALL {
            self.gm.work_offset[axis.index()] = self.active_coord_offset(axis);
        }
    }

    pub fn coord_offset(&self, coord: CoordSystem, axis: Axis) -> f64 {
        self.offsets[coord.index()][axis.index()]
    }

    /// Direct write of one persisted offset, used by the keyed accessors.
    pub(crate) fn write_coord_offset(&mut self, coord: CoordSystem, axis: Axis, value: f64) -> Result<()> {
        if coord == CoordSystem::Absolute {
            return Err(CmError::IllegalInState("machine coordinates have no offset"));
        }
        self.offsets[coord.index()][axis.index()] = value;
        self.g10_persist = true;
        self.set_work_offsets();
        Ok(())
    }

    pub fn set_coord_system(&mut self, coord: CoordSystem) {
        self.gm.coord_system = coord;
        self.set_work_offsets();
    }

    // G53, cleared again at the end of every block
    pub fn set_absolute_override(&mut self, enable: bool) {
        self.gm.absolute_override = enable;
        self.set_work_offsets();
    }

    /// G10 L2 Pn: load offsets for a work coordinate system. Axis words that
    /// are absent keep their stored value.
    pub fn set_coord_offsets(&mut self, coord: CoordSystem, offsets: &AxisWords) -> Result<()> {
        if coord == CoordSystem::Absolute {
            return Err(CmError::ParameterOutOfRange("G10 needs a work coordinate system"));
        }
        let units = self.gm.units_mode;
        for axis in Axis::ALL {
            if let Some(value) = offsets[axis.index()] {
                self.offsets[coord.index()][axis.index()] = self.axis_value_to_canonical(axis, units, value);
                self.g10_persist = true;
            }
        }
        self.set_work_offsets();
        Ok(())
    }

    /// G92: make the current position read as the given values by adjusting
    /// the origin offsets.
    pub fn set_origin_offsets(&mut self, values: &AxisWords) -> Result<()> {
        if values.iter().all(Option::is_none) {
            return Err(CmError::ParameterOutOfRange("G92 needs at least one axis word"));
        }
        let units = self.gm.units_mode;
        let coord = self.gm.coord_system.index();
        self.gmx.origin_offset_enable = true;
        for axis in Axis::ALL {
            let i = axis.index();
            if let Some(value) = values[i] {
                let value = self.axis_value_to_canonical(axis, units, value);
                self.gmx.origin_offset[i] = self.gmx.position[i] - self.offsets[coord][i] - value;
            }
        }
        self.set_work_offsets();
        Ok(())
    }

    // G92.1
    pub fn reset_origin_offsets(&mut self) {
        self.gmx.origin_offset_enable = false;
        self.gmx.origin_offset = [0.0; AXES];
        self.set_work_offsets();
    }

    // G92.2, values are kept
    pub fn suspend_origin_offsets(&mut self) {
        self.gmx.origin_offset_enable = false;
        self.set_work_offsets();
    }

    // G92.3
    pub fn resume_origin_offsets(&mut self) {
        self.gmx.origin_offset_enable = true;
        self.set_work_offsets();
    }

    // ── Stored positions ──────────────────────────────────────────────────

    // G28.1
    pub fn set_g28_position(&mut self) {
        self.gmx.g28_position = self.gmx.position;
    }

    // G30.1
    pub fn set_g30_position(&mut self) {
        self.gmx.g30_position = self.gmx.position;
    }

    /// G28: traverse through the optional intermediate point, then to the
    /// stored G28 position in machine coordinates.
    pub fn goto_g28_position(&mut self, intermediate: &AxisWords) -> Result<()> {
        let stored = self.gmx.g28_position;
        self.goto_stored_position(intermediate, stored)
    }

    // G30
    pub fn goto_g30_position(&mut self, intermediate: &AxisWords) -> Result<()> {
        let stored = self.gmx.g30_position;
        self.goto_stored_position(intermediate, stored)
    }

    fn goto_stored_position(&mut self, intermediate: &AxisWords, stored: [f64; AXES]) -> Result<()> {
        self.transaction(|cm| {
            if intermediate.iter().any(Option::is_some) {
                cm.straight_traverse(intermediate)?;
            }
            cm.require_motion_allowed()?;
            cm.gm.motion_mode = MotionMode::StraightTraverse;
            cm.gm.target = stored;
            cm.queue_move()
        })
    }

    // ── Origins ───────────────────────────────────────────────────────────

    /// G28.3: declare the current position of each given axis to be the given
    /// machine coordinate, and mark those axes homed.
    pub fn set_absolute_origin(&mut self, values: &AxisWords) -> Result<()> {
        if self.planner.is_busy() {
            return Err(CmError::IllegalInState("origin can only be set with an idle planner"));
        }
        if values.iter().all(Option::is_none) {
            return Err(CmError::ParameterOutOfRange("G28.3 needs at least one axis word"));
        }
        let units = self.gm.units_mode;
        for axis in Axis::ALL {
            if let Some(value) = values[axis.index()] {
                let value = self.axis_value_to_canonical(axis, units, value);
                self.set_axis_origin(axis, value);
            }
        }
        Ok(())
    }

    /// Set one axis' machine position in the model, the planner and the
    /// runtime, and mark it homed.
    pub fn set_axis_origin(&mut self, axis: Axis, position: f64) {
        let i = axis.index();
        self.gmx.position[i] = position;
        self.gm.target[i] = position;
        let mut runtime = self.planner.runtime_position();
        runtime[i] = position;
        self.planner.set_runtime_position(runtime);
        self.homed[i] = true;
    }

    // ── Target resolution ─────────────────────────────────────────────────

    /// Block value of `axis` in mm (degrees for rotary axes).
    fn axis_value_to_canonical(&self, axis: Axis, units: UnitsMode, value: f64) -> f64 {
        if axis.is_rotary() {
            value
        } else {
            units.to_millimeters(value)
        }
    }

    /// Resolve axis words into the model target, in machine coordinates.
    /// Absent words and disabled axes keep the current position.
    pub(crate) fn set_model_target(&mut self, words: &AxisWords) -> Result<()> {
        self.gm.target = self.gmx.position;
        let units = self.gm.units_mode;
        for axis in Axis::ALL {
            let i = axis.index();
            let Some(value) = words[i] else { continue };
            let cfg = self.config.axes[i];
            let value = match cfg.axis_mode {
                AxisMode::Disabled => continue,
                // linear words on a rotary axis, converted to degrees of rotation
                AxisMode::Radius if axis.is_rotary() && cfg.radius > 0.0 => {
                    units.to_millimeters(value) * 360.0 / (2.0 * PI * cfg.radius)
                }
                _ => self.axis_value_to_canonical(axis, units, value),
            };
            self.gm.target[i] = match self.gm.distance_mode {
                DistanceMode::Absolute => value + self.active_coord_offset(axis),
                DistanceMode::Incremental => self.gm.target[i] + value,
            };
            self.check_soft_limit(axis, self.gm.target[i])?;
        }
        Ok(())
    }

    fn check_soft_limit(&self, axis: Axis, target: f64) -> Result<()> {
        let cfg = self.config.axis(axis);
        if !self.config.soft_limit_enable || !self.homed[axis.index()] || cfg.travel_max <= cfg.travel_min {
            return Ok(());
        }
        if target < cfg.travel_min || target > cfg.travel_max {
            return Err(CmError::ParameterOutOfRange("target beyond soft limit"));
        }
        Ok(())
    }

    // ── Positions ─────────────────────────────────────────────────────────

    /// Machine position of `axis` in mm as seen by a view.
    pub fn absolute_position(&self, view: View, axis: Axis) -> f64 {
        let i = axis.index();
        match view {
            View::Model => self.gmx.position[i],
            View::Planner => self.state(View::Planner).target[i],
            View::Runtime => self.planner.runtime_position()[i],
        }
    }

    /// Work position of `axis` as seen by a view, in that view's units.
    pub fn work_position(&self, view: View, axis: Axis) -> f64 {
        let gm = self.state(view);
        let work = self.absolute_position(view, axis) - gm.work_offset[axis.index()];
        if axis.is_rotary() { work } else { gm.units_mode.from_millimeters(work) }
    }
}
