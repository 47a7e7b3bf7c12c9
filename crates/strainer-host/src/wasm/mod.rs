//! WebAssembly sandbox for filter blueprints.
//!
//! Blueprints are untrusted modules supplied at runtime. They run under
//! wasmtime with nothing granted by default.
//!
//! ## Security Model
//!
//! - **Memory isolation**: each instance has its own linear memory; the host
//!   only writes into the arena it reserved at instantiation
//! - **Budgets**: fuel bounds the steps of every call, epoch deadlines bound
//!   its wall-clock time
//! - **Fault containment**: a trap poisons the instance and drops its store;
//!   the host process is never affected
//! - **Deny-by-default**: WASI is off unless configured, and then only stdio,
//!   env vars and args can be granted
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strainer_host::wasm::{BlueprintRuntime, BlueprintConfig};
//!
//! let runtime = BlueprintRuntime::new(BlueprintConfig::default())?;
//! let module = runtime.load_file("topic_equals.wasm")?;
//!
//! let mut instance = runtime.instantiate(&module)?;
//! instance.configure(b"\x01orders")?;
//! let verdict = instance.evaluate(&record)?;
//! ```

mod config;
mod fault;
mod host_functions;
mod instance;
mod module;
mod runtime;

pub use config::{BlueprintConfig, WasiCapabilities, WASM_PAGE_SIZE};
pub use fault::{Fault, FaultKind, HostCallError};
pub use host_functions::{BlueprintHostFunctions, HostState, BLUEPRINT_LOG_TARGET};
pub use instance::{CallStats, InstanceState, InstanceStats, ModuleInstance, Phase};
pub use module::CompiledModule;
pub use runtime::BlueprintRuntime;
