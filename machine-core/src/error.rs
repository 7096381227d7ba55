use serde::Serialize;
use thiserror::Error;

use crate::modal::ModalGroup;

/// Conditions that escalate to an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Fault {
    HomingSwitchNotFound,
    HomingLatchNotFound,
    HomingSwitchClosedAtStart,
    ExternalAlarm,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Fault::HomingSwitchNotFound => "homing switch not found within travel",
            Fault::HomingLatchNotFound => "homing switch not found during latch",
            Fault::HomingSwitchClosedAtStart => "homing switch closed before search",
            Fault::ExternalAlarm => "alarm raised externally",
        };
        f.write_str(msg)
    }
}

/// Status taxonomy for every mutating canonical machine operation.
///
/// Everything except `Fault` is recoverable and leaves the model as it was
/// before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CmError {
    #[error("modal group violation: more than one {0:?} code in block")]
    ModalGroupViolation(ModalGroup),

    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(&'static str),

    #[error("operation illegal in current state: {0}")]
    IllegalInState(&'static str),

    #[error("machine fault: {0}")]
    Fault(Fault),
}

impl CmError {
    pub fn is_fault(&self) -> bool {
        matches!(self, CmError::Fault(_))
    }
}

pub type Result<T> = std::result::Result<T, CmError>;
