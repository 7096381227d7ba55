use serde::{Deserialize, Serialize};

use crate::error::{CmError, Result};

pub const OVERRIDE_FACTOR_MIN: f64 = 0.05;
pub const OVERRIDE_FACTOR_MAX: f64 = 2.0;

/// One override channel: enable flag plus multiplicative factor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct OverridePair {
    pub enable: bool,
    pub factor: f64,
}

impl Default for OverridePair {
    fn default() -> Self {
        Self { enable: false, factor: 1.0 }
    }
}

impl OverridePair {
    fn set_factor(&mut self, factor: f64, what: &'static str) -> Result<()> {
        if !factor.is_finite() || !(OVERRIDE_FACTOR_MIN..=OVERRIDE_FACTOR_MAX).contains(&factor) {
            return Err(CmError::ParameterOutOfRange(what));
        }
        self.factor = factor;
        Ok(())
    }
}

/// Feed, traverse and spindle overrides behind the M48/M49 master switch.
/// Turning the master switch off suspends every channel but keeps the stored
/// enables and factors.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Overrides {
    pub enabled: bool,
    pub feed: OverridePair,
    pub traverse: OverridePair,
    pub spindle: OverridePair,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            enabled: true,
            feed: OverridePair::default(),
            traverse: OverridePair::default(),
            spindle: OverridePair::default(),
        }
    }
}

impl Overrides {
    // M48 / M49
    pub fn set_enables(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    // M50
    pub fn set_feed_enable(&mut self, enable: bool) {
        self.feed.enable = enable;
    }

    // M50.1
    pub fn set_feed_factor(&mut self, factor: f64) -> Result<()> {
        self.feed.set_factor(factor, "feed override factor")
    }

    // M50.2
    pub fn set_traverse_enable(&mut self, enable: bool) {
        self.traverse.enable = enable;
    }

    // M50.3
    pub fn set_traverse_factor(&mut self, factor: f64) -> Result<()> {
        self.traverse.set_factor(factor, "traverse override factor")
    }

    // M51
    pub fn set_spindle_enable(&mut self, enable: bool) {
        self.spindle.enable = enable;
    }

    // M51.1
    pub fn set_spindle_factor(&mut self, factor: f64) -> Result<()> {
        self.spindle.set_factor(factor, "spindle override factor")
    }

    fn effective(&self, pair: &OverridePair) -> f64 {
        if self.enabled && pair.enable { pair.factor } else { 1.0 }
    }

    pub fn feed_factor(&self) -> f64 {
        self.effective(&self.feed)
    }

    pub fn traverse_factor(&self) -> f64 {
        self.effective(&self.traverse)
    }

    pub fn spindle_factor(&self) -> f64 {
        self.effective(&self.spindle)
    }
}
