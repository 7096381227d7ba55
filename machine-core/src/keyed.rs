//! Mnemonic key access for status reports and settings persistence.
//!
//! Keys follow the controller's traditional short names: `stat`, `momo`,
//! `posx`, `g55y`, `xvm` and so on. Reads go through the active view, so
//! status reports show the runtime while a cycle is running.

use serde::Serialize;

use crate::axis::{Axis, AxisMode};
use crate::error::{CmError, Result};
use crate::gcode::{CoordSystem, DistanceMode, PathControl, Plane, UnitsMode};
use crate::machine::CanonicalMachine;
use crate::planner::MotionPlanner;

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_bool(self) -> bool {
        self.as_f64() != 0.0
    }

    fn as_index(self) -> Option<usize> {
        let v = self.as_f64();
        (v.fract() == 0.0 && v >= 0.0).then_some(v as usize)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

const READ_ONLY: [&str; 17] = [
    "stat", "macs", "cycs", "mots", "hold", "home", "line", "mline", "vel", "unit", "coor", "momo", "plan", "path",
    "dist", "frmo", "tool",
];

const READ_ONLY_PREFIXES: [&str; 7] = ["pos", "mpo", "ofs", "g92", "g28", "g30", "hom"];

/// `pos` + `x` style keys.
fn split_axis_suffix(key: &str) -> Option<(&str, Axis)> {
    let (i, last) = key.char_indices().last()?;
    Some((&key[..i], Axis::from_char(last)?))
}

/// `g54`..`g59` to the coordinate system.
fn coord_from_prefix(prefix: &str) -> Option<CoordSystem> {
    let n: usize = prefix.strip_prefix("g5")?.parse().ok()?;
    (4..=9).contains(&n).then(|| CoordSystem::from_index(n - 3)).flatten()
}

fn plane_from(v: Value) -> Option<Plane> {
    match v.as_index()? {
        0 => Some(Plane::XY),
        1 => Some(Plane::XZ),
        2 => Some(Plane::YZ),
        _ => None,
    }
}

fn units_from(v: Value) -> Option<UnitsMode> {
    match v.as_index()? {
        0 => Some(UnitsMode::Inches),
        1 => Some(UnitsMode::Millimeters),
        _ => None,
    }
}

fn path_from(v: Value) -> Option<PathControl> {
    match v.as_index()? {
        0 => Some(PathControl::ExactPath),
        1 => Some(PathControl::ExactStop),
        2 => Some(PathControl::Continuous),
        _ => None,
    }
}

fn distance_from(v: Value) -> Option<DistanceMode> {
    match v.as_index()? {
        0 => Some(DistanceMode::Absolute),
        1 => Some(DistanceMode::Incremental),
        _ => None,
    }
}

fn non_negative(v: Value, what: &'static str) -> Result<f64> {
    let f = v.as_f64();
    if !f.is_finite() || f < 0.0 {
        return Err(CmError::ParameterOutOfRange(what));
    }
    Ok(f)
}

fn finite(v: Value, what: &'static str) -> Result<f64> {
    let f = v.as_f64();
    if !f.is_finite() {
        return Err(CmError::ParameterOutOfRange(what));
    }
    Ok(f)
}

impl<P: MotionPlanner> CanonicalMachine<P> {
    pub fn get(&self, key: &str) -> Option<Value> {
        let view = self.active_view();
        let gm = self.state(view);
        let cfg = &self.config;
        let value = match key {
            "stat" => Value::Int(self.combined_state() as i64),
            "macs" => Value::Int(self.machine_state() as i64),
            "cycs" => Value::Int(self.cycle_state() as i64),
            "mots" => Value::Int(self.motion_state() as i64),
            "hold" => Value::Int(self.hold_state as i64),
            "home" => Value::Int(self.homing_state as i64),
            "line" => Value::Int(gm.linenum.into()),
            "mline" => Value::Int(self.gm.linenum.into()),
            "vel" => Value::Float(gm.units_mode.from_millimeters(self.planner.runtime_velocity())),
            "unit" => Value::Int(gm.units_mode as i64),
            "coor" => Value::Int(gm.coord_system as i64),
            "momo" => Value::Int(gm.motion_mode as i64),
            "plan" => Value::Int(gm.select_plane as i64),
            "path" => Value::Int(gm.path_control as i64),
            "dist" => Value::Int(gm.distance_mode as i64),
            "frmo" => Value::Bool(gm.inverse_feed_rate_mode),
            "tool" => Value::Int(gm.tool.into()),
            "ja" => Value::Float(cfg.junction_acceleration),
            "ct" => Value::Float(cfg.chordal_tolerance),
            "ml" => Value::Float(cfg.min_segment_len),
            "ma" => Value::Float(cfg.arc_segment_len),
            "ms" => Value::Float(cfg.estd_segment_usec),
            "sl" => Value::Bool(cfg.soft_limit_enable),
            "bds" => Value::Bool(self.gmx.block_delete_switch),
            "gpl" => Value::Int(cfg.select_plane as i64),
            "gun" => Value::Int(cfg.units_mode as i64),
            "gco" => Value::Int(cfg.coord_system as i64),
            "gpa" => Value::Int(cfg.path_control as i64),
            "gdi" => Value::Int(cfg.distance_mode as i64),
            _ => return self.get_axis_key(key),
        };
        Some(value)
    }

    fn get_axis_key(&self, key: &str) -> Option<Value> {
        let view = self.active_view();
        if let Some((prefix, axis)) = split_axis_suffix(key) {
            let i = axis.index();
            let value = match prefix {
                "pos" => Some(self.work_position(view, axis)),
                "mpo" => Some(self.absolute_position(view, axis)),
                "ofs" => Some(self.state(view).work_offset[i]),
                "g92" => Some(self.gmx.origin_offset[i]),
                "g28" => Some(self.gmx.g28_position[i]),
                "g30" => Some(self.gmx.g30_position[i]),
                "hom" => return Some(Value::Bool(self.homed[i])),
                _ => coord_from_prefix(prefix).map(|coord| self.coord_offset(coord, axis)),
            };
            if let Some(v) = value {
                return Some(Value::Float(v));
            }
        }

        let mut chars = key.chars();
        let axis = Axis::from_char(chars.next()?)?;
        let ax = self.config.axis(axis);
        let value = match chars.as_str() {
            "am" => Value::Int(ax.axis_mode as i64),
            "fr" => Value::Float(ax.feedrate_max),
            "vm" => Value::Float(ax.velocity_max),
            "tn" => Value::Float(ax.travel_min),
            "tm" => Value::Float(ax.travel_max),
            "jm" => Value::Float(ax.jerk_max),
            "jh" => Value::Float(ax.jerk_homing),
            "jd" => Value::Float(ax.junction_dev),
            "ra" => Value::Float(ax.radius),
            "sv" => Value::Float(ax.search_velocity),
            "lv" => Value::Float(ax.latch_velocity),
            "lb" => Value::Float(ax.latch_backoff),
            "zb" => Value::Float(ax.zero_backoff),
            _ => return None,
        };
        Some(value)
    }

    /// Write a setting. Status keys are read-only; unknown keys and values
    /// out of range are rejected without changing anything.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        if READ_ONLY.contains(&key) {
            return Err(CmError::IllegalInState("read-only key"));
        }
        let cfg = &mut self.config;
        match key {
            "ja" => cfg.junction_acceleration = non_negative(value, "junction acceleration")?,
            "ct" => cfg.chordal_tolerance = non_negative(value, "chordal tolerance")?,
            "ml" => cfg.min_segment_len = non_negative(value, "minimum segment length")?,
            "ma" => cfg.arc_segment_len = non_negative(value, "arc segment length")?,
            "ms" => cfg.estd_segment_usec = non_negative(value, "segment time")?,
            "sl" => cfg.soft_limit_enable = value.as_bool(),
            "bds" => self.gmx.block_delete_switch = value.as_bool(),
            "gpl" => cfg.select_plane = plane_from(value).ok_or(CmError::ParameterOutOfRange("plane"))?,
            "gun" => cfg.units_mode = units_from(value).ok_or(CmError::ParameterOutOfRange("units mode"))?,
            "gco" => {
                cfg.coord_system = value
                    .as_index()
                    .filter(|i| *i >= 1)
                    .and_then(CoordSystem::from_index)
                    .ok_or(CmError::ParameterOutOfRange("coordinate system"))?
            }
            "gpa" => cfg.path_control = path_from(value).ok_or(CmError::ParameterOutOfRange("path control"))?,
            "gdi" => cfg.distance_mode = distance_from(value).ok_or(CmError::ParameterOutOfRange("distance mode"))?,
            _ => return self.set_axis_key(key, value),
        }
        Ok(())
    }

    fn set_axis_key(&mut self, key: &str, value: Value) -> Result<()> {
        if let Some((prefix, axis)) = split_axis_suffix(key) {
            if READ_ONLY_PREFIXES.contains(&prefix) {
                return Err(CmError::IllegalInState("read-only key"));
            }
            if let Some(coord) = coord_from_prefix(prefix) {
                return self.write_coord_offset(coord, axis, finite(value, "coordinate offset")?);
            }
        }

        let mut chars = key.chars();
        let axis = chars
            .next()
            .and_then(Axis::from_char)
            .ok_or(CmError::ParameterOutOfRange("unknown key"))?;
        let ax = self.config.axis_mut(axis);
        match chars.as_str() {
            "am" => {
                let mode = value.as_index().and_then(|i| u8::try_from(i).ok()).and_then(AxisMode::from_u8);
                ax.axis_mode = mode.ok_or(CmError::ParameterOutOfRange("axis mode"))?;
            }
            "fr" => ax.feedrate_max = non_negative(value, "feed rate maximum")?,
            "vm" => ax.velocity_max = non_negative(value, "velocity maximum")?,
            "tn" => ax.travel_min = finite(value, "travel minimum")?,
            "tm" => ax.travel_max = finite(value, "travel maximum")?,
            "jm" => ax.jerk_max = non_negative(value, "jerk maximum")?,
            "jh" => ax.jerk_homing = non_negative(value, "homing jerk")?,
            "jd" => ax.junction_dev = non_negative(value, "junction deviation")?,
            "ra" => ax.radius = non_negative(value, "radius")?,
            "sv" => ax.search_velocity = finite(value, "search velocity")?,
            "lv" => ax.latch_velocity = non_negative(value, "latch velocity")?,
            "lb" => ax.latch_backoff = non_negative(value, "latch backoff")?,
            "zb" => ax.zero_backoff = non_negative(value, "zero backoff")?,
            _ => return Err(CmError::ParameterOutOfRange("unknown key")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::machine::tests::{approx_eq, machine};
    use crate::modal::Code;
    use crate::state::CombinedState;

    fn float(v: Option<Value>) -> f64 {
        v.expect("key exists").as_f64()
    }

    #[test]
    fn status_keys_follow_state() {
        let mut cm = machine();
        assert_eq!(cm.get("stat"), Some(Value::Int(CombinedState::Ready as i64)));
        cm.execute_block(&Block::new().code(Code::G1).axis(Axis::X, 10.0).feed(600.0).line(42)).unwrap();
        assert_eq!(cm.get("stat"), Some(Value::Int(CombinedState::Run as i64)));
        assert_eq!(cm.get("mline"), Some(Value::Int(42)));
        // the runtime has not started the block yet
        assert_eq!(cm.get("line"), Some(Value::Int(0)));
        assert_eq!(cm.get("momo"), Some(Value::Int(0)));
    }

    #[test]
    fn velocity_and_block_delete_keys() {
        let mut cm = machine();
        approx_eq(float(cm.get("vel")), 0.0);
        cm.execute_block(&Block::new().code(Code::G20).code(Code::G1).axis(Axis::X, 1.0).feed(6.0)).unwrap();
        cm.planner_mut().tick(100.0);
        // 6 in/min reported in the runtime's units
        approx_eq(float(cm.get("vel")), 6.0);
        assert_eq!(cm.set("vel", Value::Float(1.0)), Err(CmError::IllegalInState("read-only key")));

        assert_eq!(cm.get("bds"), Some(Value::Bool(true)));
        cm.set("bds", Value::Bool(false)).unwrap();
        assert!(!cm.block_delete_switch());
    }

    #[test]
    fn positions_and_offsets() {
        let mut cm = machine();
        cm.set("g54x", Value::Float(10.0)).unwrap();
        assert!(cm.g10_persist());
        approx_eq(float(cm.get("g54x")), 10.0);
        approx_eq(float(cm.get("ofsx")), 10.0);
        cm.execute_block(&Block::new().code(Code::G0).axis(Axis::X, 5.0)).unwrap();
        cm.planner_mut().tick(10_000.0);
        cm.sequencing_callback();
        approx_eq(float(cm.get("mpox")), 15.0);
        approx_eq(float(cm.get("posx")), 5.0);
        assert_eq!(cm.get("homx"), Some(Value::Bool(false)));
    }

    #[test]
    fn axis_settings_round_trip_through_keys() {
        let mut cm = machine();
        cm.set("xvm", Value::Float(8_000.0)).unwrap();
        approx_eq(cm.config().axis(Axis::X).velocity_max, 8_000.0);
        cm.set("aam", Value::Int(3)).unwrap();
        assert_eq!(cm.config().axis(Axis::A).axis_mode, AxisMode::Radius);
        assert_eq!(cm.set("aam", Value::Int(7)), Err(CmError::ParameterOutOfRange("axis mode")));
        assert_eq!(cm.set("yfr", Value::Float(-1.0)), Err(CmError::ParameterOutOfRange("feed rate maximum")));
        approx_eq(float(cm.get("zsv")), -1_000.0);
    }

    #[test]
    fn defaults_and_read_only_keys() {
        let mut cm = machine();
        cm.set("gun", Value::Int(0)).unwrap();
        assert_eq!(cm.config().units_mode, UnitsMode::Inches);
        cm.set("gco", Value::Int(2)).unwrap();
        assert_eq!(cm.config().coord_system, CoordSystem::G55);
        assert!(cm.set("gco", Value::Int(0)).is_err());
        assert_eq!(cm.set("stat", Value::Int(0)), Err(CmError::IllegalInState("read-only key")));
        assert_eq!(cm.set("posx", Value::Float(1.0)), Err(CmError::IllegalInState("read-only key")));
        assert_eq!(cm.set("nope", Value::Int(1)), Err(CmError::ParameterOutOfRange("unknown key")));
        assert_eq!(cm.get("nope"), None);
        assert_eq!(cm.get("xqq"), None);
    }
}
