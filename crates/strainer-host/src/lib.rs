//! # Strainer Host
//!
//! Sandboxed execution of filter blueprints.
//!
//! A blueprint is a WebAssembly module exporting `parse_parameters` and
//! `matches`. The host compiles it once, creates isolated instances, hands
//! each instance opaque parameter bytes and then one record at a time, and
//! reads back a verdict. Everything the module does runs under a step and a
//! wall-clock budget; a module that traps, loops or breaks the contract is
//! contained and its instance is discarded.
//!
//! ## Components
//!
//! | Component | Type |
//! |-----------|------|
//! | Module Instance Manager | [`BlueprintRuntime`], [`CompiledModule`] |
//! | Arena | [`arena::Arena`] |
//! | Invocation Engine | [`ModuleInstance`] |
//! | Fault Containment | [`Fault`], [`FaultKind`] |
//! | Worker checkout | [`InstancePool`] |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strainer_host::{BlueprintConfig, BlueprintRuntime, InputRecord};
//!
//! let runtime = BlueprintRuntime::new(BlueprintConfig::strict())?;
//! let module = runtime.load("topic-equals", &wasm_bytes)?;
//! let mut instance = runtime.instantiate(&module)?;
//!
//! instance.configure(b"\x01orders")?;
//! let verdict = instance.evaluate(&InputRecord::new("orders"))?;
//! assert!(verdict.is_match());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
pub mod error;
pub mod pool;
pub mod stats;
pub mod wasm;

// Re-export main types
pub use error::{BlueprintError, Result};
pub use pool::{InstancePool, PoolStatus, PooledInstance};
pub use stats::{LatencyStats, LatencySummary};
pub use wasm::{
    BlueprintConfig, BlueprintRuntime, CallStats, CompiledModule, Fault, FaultKind, InstanceState,
    InstanceStats, ModuleInstance, Phase, WasiCapabilities,
};

pub use strainer_abi::{AbiConfig, FilterVerdict, InputRecord};
