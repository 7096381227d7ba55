use serde::{Deserialize, Serialize};

use crate::axis::{Axis, AXES};
use crate::modal::Code;

/// One interpreted G-code block as handed over by the dispatcher.
///
/// Values are raw (pre-normalized, in the block's units). A word that was not
/// present in the block is `None`. Built fresh per block and dropped after
/// `CanonicalMachine::execute_block`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Block {
    pub codes: Vec<Code>,
    pub linenum: Option<u32>,
    pub target: [Option<f64>; AXES],
    pub feed_rate: Option<f64>,     // F
    pub spindle_speed: Option<f64>, // S
    pub tool: Option<u8>,           // T
    pub parameter: Option<f64>,     // P
    pub l_word: Option<u8>,         // L
    pub arc_offset: [Option<f64>; 3], // I J K
    pub arc_radius: Option<f64>,    // R
    /// Line began with `/`.
    #[serde(default)]
    pub block_delete: bool,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, code: Code) -> Self {
        self.codes.push(code);
        self
    }

    pub fn axis(mut self, axis: Axis, value: f64) -> Self {
        self.target[axis.index()] = Some(value);
        self
    }

    pub fn feed(mut self, f: f64) -> Self {
        self.feed_rate = Some(f);
        self
    }

    pub fn spindle(mut self, s: f64) -> Self {
        self.spindle_speed = Some(s);
        self
    }

    pub fn tool(mut self, t: u8) -> Self {
        self.tool = Some(t);
        self
    }

    pub fn p(mut self, p: f64) -> Self {
        self.parameter = Some(p);
        self
    }

    pub fn l(mut self, l: u8) -> Self {
        self.l_word = Some(l);
        self
    }

    pub fn ijk(mut self, i: Option<f64>, j: Option<f64>, k: Option<f64>) -> Self {
        self.arc_offset = [i, j, k];
        self
    }

    pub fn radius(mut self, r: f64) -> Self {
        self.arc_radius = Some(r);
        self
    }

    pub fn deletable(mut self) -> Self {
        self.block_delete = true;
        self
    }

    pub fn line(mut self, n: u32) -> Self {
        self.linenum = Some(n);
        self
    }

    pub fn has(&self, code: Code) -> bool {
        self.codes.contains(&code)
    }

    pub fn has_axis_words(&self) -> bool {
        self.target.iter().any(Option::is_some)
    }
}
