//! Move timing from per-axis velocity and jerk limits.
//!
//! Times are in minutes. The optimal time is the longest of the programmed
//! time (feed rate or inverse time) and every limiting axis' own time; the
//! minimum time is the shortest non-zero per-axis time.

use std::f64::consts::PI;

use crate::axis::{AxisMode, AXES};
use crate::config::MachineConfig;
use crate::gcode::{GCodeState, MotionMode};
use crate::overrides::Overrides;

const JERK_MULTIPLIER: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveTimes {
    pub move_time: f64,
    pub minimum_time: f64,
}

/// Degrees to mm of surface travel for a radius-mode axis.
fn radius_scale(radius: f64) -> f64 {
    2.0 * PI * radius / 360.0
}

/// Rest-to-rest time for distance `d` under a constant jerk limit.
fn jerk_limited_time(d: f64, jerk: f64) -> f64 {
    if jerk <= 0.0 {
        return 0.0;
    }
    (32.0 * d / (jerk * JERK_MULTIPLIER)).cbrt()
}

pub fn move_times(
    gm: &GCodeState,
    position: &[f64; AXES],
    config: &MachineConfig,
    overrides: &Overrides,
    inverse_feed_rate: f64,
) -> MoveTimes {
    let traverse = gm.motion_mode == MotionMode::StraightTraverse;
    let feed_factor = overrides.feed_factor();
    let traverse_factor = overrides.traverse_factor();

    // per-axis travel in mm (radius axes converted), zero for disabled axes
    let mut travel = [0.0; AXES];
    for (i, cfg) in config.axes.iter().enumerate() {
        if !cfg.axis_mode.is_timed() {
            continue;
        }
        let d = (gm.target[i] - position[i]).abs();
        travel[i] = match cfg.axis_mode {
            AxisMode::Radius => d * radius_scale(cfg.radius),
            _ => d,
        };
    }

    let mut programmed = 0.0;
    if !traverse {
        if gm.inverse_feed_rate_mode {
            if inverse_feed_rate > 0.0 {
                programmed = 1.0 / (inverse_feed_rate * feed_factor);
            }
        } else if gm.feed_rate > 0.0 {
            let feed = gm.feed_rate * feed_factor;
            let xyz = travel[..3].iter().map(|d| d * d).sum::<f64>().sqrt();
            programmed = if xyz > 0.0 {
                xyz / feed
            } else {
                travel[3..].iter().map(|d| d * d).sum::<f64>().sqrt() / feed
            };
        }
    }

    let mut max_time: f64 = 0.0;
    let mut min_time = f64::INFINITY;
    for (i, cfg) in config.axes.iter().enumerate() {
        if !cfg.axis_mode.is_timed() || travel[i] == 0.0 {
            continue;
        }
        let velocity = if traverse { cfg.velocity_max * traverse_factor } else { cfg.feedrate_max };
        if velocity <= 0.0 {
            continue;
        }
        let t = (travel[i] / velocity).max(jerk_limited_time(travel[i], cfg.jerk_max));
        min_time = min_time.min(t);
        if cfg.axis_mode.limits_move_time() {
            max_time = max_time.max(t);
        }
    }

    MoveTimes {
        move_time: programmed.max(max_time),
        minimum_time: if min_time.is_finite() { min_time } else { 0.0 },
    }
}
