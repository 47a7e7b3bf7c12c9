//! Fault containment: turning guest failures into typed host errors.
//!
//! Every call into a blueprint goes through [`classify`] on failure. The
//! instance that produced a fault is poisoned by the caller and its store is
//! dropped; nothing about the guest is trusted afterwards.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use wasmtime::Trap;

/// What went wrong inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Step budget (fuel) exhausted
    FuelExhausted,
    /// Wall-clock budget exceeded
    DeadlineExceeded,
    /// Load or store outside linear memory or a table
    MemoryOutOfBounds,
    /// `unreachable` executed (abort, panic)
    Unreachable,
    /// Guest call stack exhausted
    StackOverflow,
    /// Division by zero, overflow, bad float conversion
    Arithmetic,
    /// A host function refused the module's arguments
    HostCall,
    /// Module returned a value outside its contract
    ContractViolation,
    /// Any other trap
    Other,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::FuelExhausted => "fuel exhausted",
            FaultKind::DeadlineExceeded => "deadline exceeded",
            FaultKind::MemoryOutOfBounds => "out-of-bounds memory access",
            FaultKind::Unreachable => "unreachable executed",
            FaultKind::StackOverflow => "stack overflow",
            FaultKind::Arithmetic => "arithmetic trap",
            FaultKind::HostCall => "host call rejected",
            FaultKind::ContractViolation => "contract violation",
            FaultKind::Other => "trap",
        };
        f.write_str(s)
    }
}

/// A contained module fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Classification
    pub kind: FaultKind,
    /// Export (or lifecycle step) that was running
    pub export: &'static str,
    /// Detail from the runtime
    pub message: String,
}

impl Fault {
    /// Create a fault.
    pub fn new(kind: FaultKind, export: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            export,
            message: message.into(),
        }
    }

    /// Whether the fault came from a resource budget rather than a guest bug.
    pub fn is_budget(&self) -> bool {
        matches!(self.kind, FaultKind::FuelExhausted | FaultKind::DeadlineExceeded)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in '{}': {}", self.kind, self.export, self.message)
    }
}

/// Raised by host functions when a module passes arguments they refuse.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HostCallError(pub String);

/// Classify the error returned by a call into the module.
pub(crate) fn classify(export: &'static str, err: &wasmtime::Error) -> Fault {
    let kind = if let Some(trap) = err.downcast_ref::<Trap>() {
        trap_kind(trap)
    } else if err.downcast_ref::<HostCallError>().is_some() {
        FaultKind::HostCall
    } else {
        FaultKind::Other
    };
    Fault::new(kind, export, format!("{:#}", err))
}

fn trap_kind(trap: &Trap) -> FaultKind {
    match trap {
        Trap::OutOfFuel => FaultKind::FuelExhausted,
        Trap::Interrupt => FaultKind::DeadlineExceeded,
        Trap::MemoryOutOfBounds | Trap::HeapMisaligned | Trap::TableOutOfBounds => {
            FaultKind::MemoryOutOfBounds
        }
        Trap::UnreachableCodeReached => FaultKind::Unreachable,
        Trap::StackOverflow => FaultKind::StackOverflow,
        Trap::IntegerOverflow | Trap::IntegerDivisionByZero | Trap::BadConversionToInteger => {
            FaultKind::Arithmetic
        }
        _ => FaultKind::Other,
    }
}
