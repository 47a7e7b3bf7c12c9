//! Module instances and the invocation state machine.
//!
//! ```text
//! configure:  Idle -> ParamsEncoded -> ParamsParsed -> Idle
//! evaluate:   Idle -> RecordEncoded -> Evaluated   -> Idle
//! ```
//!
//! `evaluate` is only legal once `configure` has produced a handle. Whatever
//! happens inside a call, the phase is back to `Idle` when the method
//! returns.

use std::time::Instant;

use serde::Serialize;
use strainer_abi::contract::{MATCHES_EXPORT, MEMORY_EXPORT, PARSE_PARAMETERS_EXPORT};
use strainer_abi::{
    encode_record_into, encoded_len, CodecError, FilterVerdict, InputRecord, MatchOutcome,
    ParseOutcome,
};
use wasmtime::{Memory, Store, Trap, TypedFunc};

use super::config::{BlueprintConfig, WASM_PAGE_SIZE};
use super::fault::{classify, Fault, FaultKind, HostCallError};
use super::host_functions::HostState;
use super::module::CompiledModule;
use crate::arena::Arena;
use crate::error::{BlueprintError, Result};

/// Position in the invocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No call in progress
    Idle,
    /// Parameters written to the arena
    ParamsEncoded,
    /// `parse_parameters` returned
    ParamsParsed,
    /// Record written to the arena
    RecordEncoded,
    /// `matches` returned
    Evaluated,
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    /// No parameters parsed yet
    Unconfigured,
    /// Parameters accepted
    Configured {
        /// Handle returned by `parse_parameters`
        handle: i32,
    },
    /// Last `configure` was rejected by the module
    Rejected {
        /// Negative code returned by `parse_parameters`
        code: i32,
    },
    /// A fault was contained; the store is gone
    Poisoned(Fault),
    /// Disposed by the caller
    Disposed,
}

/// Cost of the most recent call into the module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    /// Wall-clock time spent in the module, in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// Cumulative statistics of one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstanceStats {
    /// Calls that entered the module, faulted ones included
    pub module_calls: u64,
    /// Successful `evaluate` calls
    pub evaluations: u64,
    /// Evaluations that matched
    pub matches: u64,
    /// Total fuel consumed
    pub fuel_consumed: u64,
}

/// What the host writes into the arena before a call.
enum CallInput<'a> {
    Params(&'a [u8]),
    Record(&'a InputRecord),
}

impl CallInput<'_> {
    fn len(&self, config: &BlueprintConfig) -> usize {
        match self {
            CallInput::Params(bytes) => bytes.len(),
            CallInput::Record(record) => encoded_len(record, &config.abi),
        }
    }
}

/// Everything that dies with the store.
struct Live {
    store: Store<HostState>,
    memory: Memory,
    arena: Arena,
    parse_fn: TypedFunc<(), i32>,
    matches_fn: TypedFunc<(), i32>,
}

/// One sandboxed instance of a blueprint.
///
/// Owns its linear memory exclusively. All methods take `&mut self`, so at
/// most one call is ever in flight.
pub struct ModuleInstance {
    module: CompiledModule,
    live: Option<Live>,
    state: InstanceState,
    phase: Phase,
    stats: InstanceStats,
    last_call: Option<CallStats>,
}

impl ModuleInstance {
    pub(crate) fn new(module: CompiledModule) -> Result<Self> {
        let config = &module.shared().config;
        let mut store = Store::new(
            &module.shared().engine,
            HostState::new(module.name_arc(), config),
        );
        store.limiter(|state| state.limits());
        arm_budget(&mut store, config)?;

        // The start function runs here; its traps and refused host calls are faults
        let instance = module.pre().instantiate(&mut store).map_err(|e| {
            if e.downcast_ref::<Trap>().is_some() || e.downcast_ref::<HostCallError>().is_some() {
                BlueprintError::ModuleFault(classify("instantiate", &e))
            } else {
                BlueprintError::ResourceExhausted(format!(
                    "instantiating '{}': {:#}",
                    module.name(),
                    e
                ))
            }
        })?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| {
                BlueprintError::UnsupportedInterface(format!("'{}' is not exported", MEMORY_EXPORT))
            })?;

        // Reserve the arena above everything the module has allocated so far
        let previous_pages = memory
            .grow(&mut store, config.arena_pages as u64)
            .map_err(|e| {
                BlueprintError::ResourceExhausted(format!(
                    "cannot reserve {} arena page(s) for '{}': {:#}",
                    config.arena_pages,
                    module.name(),
                    e
                ))
            })?;
        let arena = Arena::new(previous_pages * WASM_PAGE_SIZE, config.arena_bytes())?;

        let parse_fn = typed_export(&instance, &mut store, PARSE_PARAMETERS_EXPORT)?;
        let matches_fn = typed_export(&instance, &mut store, MATCHES_EXPORT)?;

        tracing::debug!(
            module = module.name(),
            arena_base = arena.base(),
            arena_bytes = arena.capacity(),
            "blueprint instantiated"
        );

        Ok(Self {
            module,
            live: Some(Live {
                store,
                memory,
                arena,
                parse_fn,
                matches_fn,
            }),
            state: InstanceState::Unconfigured,
            phase: Phase::Idle,
            stats: InstanceStats::default(),
            last_call: None,
        })
    }

    /// Parse and cache filter parameters.
    ///
    /// Returns the module's handle. A negative result from the module is an
    /// `InvalidParameters` error; the instance stays usable and may be
    /// configured again.
    pub fn configure(&mut self, params: &[u8]) -> Result<i32> {
        let result = self.run_configure(params);
        self.phase = Phase::Idle;
        result
    }

    fn run_configure(&mut self, params: &[u8]) -> Result<i32> {
        self.check_usable()?;

        let raw = self.invoke(
            PARSE_PARAMETERS_EXPORT,
            CallInput::Params(params),
            Phase::ParamsEncoded,
        )?;
        self.set_phase(Phase::ParamsParsed);

        match ParseOutcome::from_raw(raw) {
            ParseOutcome::Handle(handle) => {
                self.state = InstanceState::Configured { handle };
                if let Some(live) = self.live.as_mut() {
                    live.store.data_mut().params_handle = Some(handle);
                }
                tracing::debug!(module = self.module.name(), handle, "parameters accepted");
                Ok(handle)
            }
            ParseOutcome::Rejected(code) => {
                self.state = InstanceState::Rejected { code };
                if let Some(live) = self.live.as_mut() {
                    live.store.data_mut().params_handle = None;
                }
                Err(BlueprintError::InvalidParameters {
                    code: Some(code),
                    reason: format!(
                        "'{}' rejected the parameters with code {}",
                        self.module.name(),
                        code
                    ),
                })
            }
        }
    }

    /// Decide whether `record` matches the configured parameters.
    pub fn evaluate(&mut self, record: &InputRecord) -> Result<FilterVerdict> {
        let result = self.run_evaluate(record);
        self.phase = Phase::Idle;
        result
    }

    fn run_evaluate(&mut self, record: &InputRecord) -> Result<FilterVerdict> {
        self.check_usable()?;
        match self.state {
            InstanceState::Configured { .. } => {}
            InstanceState::Rejected { code } => {
                return Err(BlueprintError::InvalidParameters {
                    code: Some(code),
                    reason: "parameters were rejected; configure again before evaluating"
                        .to_string(),
                })
            }
            _ => {
                return Err(BlueprintError::InvalidParameters {
                    code: None,
                    reason: "no parameters parsed; call configure first".to_string(),
                })
            }
        }

        let raw = self.invoke(MATCHES_EXPORT, CallInput::Record(record), Phase::RecordEncoded)?;
        self.set_phase(Phase::Evaluated);

        match MatchOutcome::from_raw(raw) {
            MatchOutcome::Match => {
                self.stats.evaluations += 1;
                self.stats.matches += 1;
                Ok(FilterVerdict::from(true))
            }
            MatchOutcome::NoMatch => {
                self.stats.evaluations += 1;
                Ok(FilterVerdict::from(false))
            }
            MatchOutcome::Malformed(value) => {
                self.poison(Fault::new(
                    FaultKind::ContractViolation,
                    MATCHES_EXPORT,
                    format!("returned {}, expected 0 or 1", value),
                ));
                Err(BlueprintError::MalformedResult {
                    export: MATCHES_EXPORT,
                    value,
                })
            }
        }
    }

    /// Evaluate several records in submission order, one result per record.
    ///
    /// Stops entering the module once it is poisoned; the remaining records
    /// report the same fault.
    pub fn evaluate_batch(&mut self, records: &[InputRecord]) -> Vec<Result<FilterVerdict>> {
        records.iter().map(|record| self.evaluate(record)).collect()
    }

    /// Release the instance's memory. Idempotent.
    pub fn dispose(&mut self) {
        if matches!(self.state, InstanceState::Disposed) {
            return;
        }
        self.live = None;
        self.state = InstanceState::Disposed;
        self.phase = Phase::Idle;
        tracing::debug!(module = self.module.name(), "blueprint instance disposed");
    }

    /// Module this instance was created from.
    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    /// Current phase of the invocation state machine.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handle returned by the last accepted `configure`.
    pub fn params_handle(&self) -> Option<i32> {
        match self.state {
            InstanceState::Configured { handle } => Some(handle),
            _ => None,
        }
    }

    /// Whether the instance has been poisoned by a fault.
    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, InstanceState::Poisoned(_))
    }

    /// Whether further calls can enter the module.
    pub fn is_usable(&self) -> bool {
        self.live.is_some()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> InstanceStats {
        self.stats
    }

    /// Cost of the last call into the module.
    pub fn last_call(&self) -> Option<CallStats> {
        self.last_call
    }

    /// Current linear memory size in bytes, arena included.
    pub fn memory_size(&self) -> Option<usize> {
        self.live.as_ref().map(|live| live.memory.data_size(&live.store))
    }

    fn check_usable(&self) -> Result<()> {
        match &self.state {
            InstanceState::Disposed => Err(BlueprintError::Disposed),
            InstanceState::Poisoned(fault) => Err(BlueprintError::ModuleFault(fault.clone())),
            _ => Ok(()),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        tracing::trace!(module = self.module.name(), from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    /// Write `input` into the arena, call `export`, and clean up.
    ///
    /// Every entry into the module goes through here: the budget is re-armed,
    /// the descriptor is visible only for the duration of the call, and
    /// leases are released before returning. A trap poisons the instance.
    fn invoke(
        &mut self,
        export: &'static str,
        input: CallInput<'_>,
        encoded: Phase,
    ) -> Result<i32> {
        let module = self.module.clone();
        let config = &module.shared().config;
        let live = self.live.as_mut().ok_or(BlueprintError::Disposed)?;

        let region = live.arena.lease(input.len(config))?;
        let written = {
            let dest = &mut live.memory.data_mut(&mut live.store)[region.range()];
            match input {
                CallInput::Params(bytes) => {
                    dest.copy_from_slice(bytes);
                    Ok(())
                }
                CallInput::Record(record) => {
                    encode_record_into(record, &config.abi, dest).map(|_| ())
                }
            }
        };
        if let Err(e) = written {
            live.arena.release();
            return Err(abi_limit(module.name(), e));
        }
        self.set_phase(encoded);

        let live = self.live.as_mut().ok_or(BlueprintError::Disposed)?;
        let state = live.store.data_mut();
        state.frame = Some(region);
        state.log.reset();
        arm_budget(&mut live.store, config)?;

        let func = if export == MATCHES_EXPORT {
            live.matches_fn.clone()
        } else {
            live.parse_fn.clone()
        };

        let start = Instant::now();
        let outcome = func.call(&mut live.store, ());
        let execution_time_us = start.elapsed().as_micros() as u64;
        let fuel_consumed = config
            .fuel_per_call
            .zip(live.store.get_fuel().ok())
            .map(|(granted, left)| granted.saturating_sub(left));

        live.store.data_mut().frame = None;
        live.arena.release();
        let dropped = live.store.data().log.dropped();

        self.stats.module_calls += 1;
        self.stats.fuel_consumed += fuel_consumed.unwrap_or(0);
        self.last_call = Some(CallStats {
            execution_time_us,
            fuel_consumed,
        });
        if dropped > 0 {
            tracing::debug!(module = module.name(), export, dropped, "log entries dropped");
        }

        outcome.map_err(|e| {
            let fault = classify(export, &e);
            self.poison(fault.clone());
            BlueprintError::ModuleFault(fault)
        })
    }

    /// Contain a fault: drop the store and refuse every later call.
    fn poison(&mut self, fault: Fault) {
        tracing::warn!(
            module = self.module.name(),
            kind = %fault.kind,
            export = fault.export,
            "blueprint fault contained: {}",
            fault.message
        );
        self.live = None;
        self.state = InstanceState::Poisoned(fault);
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.module.name())
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Reset the per-call step and wall-clock budgets.
fn arm_budget(store: &mut Store<HostState>, config: &BlueprintConfig) -> Result<()> {
    if let Some(fuel) = config.fuel_per_call {
        store
            .set_fuel(fuel)
            .map_err(|e| BlueprintError::Config(format!("fuel setup failed: {}", e)))?;
    }
    if let Some(ticks) = config.epoch_deadline_ticks() {
        store.set_epoch_deadline(ticks);
    }
    Ok(())
}

fn typed_export(
    instance: &wasmtime::Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<(), i32>> {
    instance
        .get_typed_func::<(), i32>(store, name)
        .map_err(|e| {
            BlueprintError::UnsupportedInterface(format!("function '{}' not found: {}", name, e))
        })
}

/// A record the ABI cannot express is a limit, not a module failure.
fn abi_limit(module: &str, err: CodecError) -> BlueprintError {
    BlueprintError::ResourceExhausted(format!(
        "record does not fit the ABI of '{}': {}",
        module, err
    ))
}
