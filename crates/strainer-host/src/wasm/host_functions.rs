//! Host functions exposed to blueprint modules.
//!
//! ## Import Module
//!
//! Host functions are imported under the `blueprint` namespace:
//! ```wat
//! (import "blueprint" "input_offset" (func $input_offset (result i32)))
//! (import "blueprint" "input_length" (func $input_length (result i32)))
//! (import "blueprint" "params_handle" (func $params_handle (result i32)))
//! (import "blueprint" "log" (func $log (param i32 i32 i32)))
//! ```
//!
//! `input_offset`/`input_length` describe the arena region written for the
//! call in progress: the raw parameters during `parse_parameters`, the
//! encoded record during `matches`. Outside a call they return `-1` and `0`.
//! The region is only valid until the export returns.

use std::sync::Arc;
use strainer_abi::contract::{
    log_level, HOST_MODULE, INPUT_LENGTH_IMPORT, INPUT_OFFSET_IMPORT, LOG_IMPORT, NONE,
    PARAMS_HANDLE_IMPORT,
};
use wasmtime::{Caller, Linker, Memory, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;

use super::config::{BlueprintConfig, WasiCapabilities};
use super::fault::HostCallError;
use crate::arena::ArenaRegion;
use crate::error::{BlueprintError, Result};

/// Tracing target of messages logged by modules.
pub const BLUEPRINT_LOG_TARGET: &str = "strainer::blueprint";

/// Host functions as `(name, i32 params, i32 results)`.
pub(crate) const HOST_FUNCTIONS: [(&str, usize, usize); 4] = [
    (INPUT_OFFSET_IMPORT, 0, 1),
    (INPUT_LENGTH_IMPORT, 0, 1),
    (PARAMS_HANDLE_IMPORT, 0, 1),
    (LOG_IMPORT, 3, 0),
];

/// Per-call log allowance.
#[derive(Debug)]
pub(crate) struct LogBudget {
    max_entries: usize,
    max_bytes: usize,
    emitted: usize,
    dropped: usize,
}

impl LogBudget {
    fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            emitted: 0,
            dropped: 0,
        }
    }

    /// Start a new call.
    pub(crate) fn reset(&mut self) {
        self.emitted = 0;
        self.dropped = 0;
    }

    pub(crate) fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Host state stored in every blueprint `Store`.
pub struct HostState {
    module: Arc<str>,
    wasi: WasiP1Ctx,
    limits: StoreLimits,
    pub(crate) frame: Option<ArenaRegion>,
    pub(crate) params_handle: Option<i32>,
    pub(crate) log: LogBudget,
}

impl HostState {
    pub(crate) fn new(module: Arc<str>, config: &BlueprintConfig) -> Self {
        let caps = config.wasi.clone().unwrap_or_default();
        Self {
            module,
            wasi: build_wasi(&caps),
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory)
                .instances(1)
                .build(),
            frame: None,
            params_handle: None,
            log: LogBudget::new(config.max_log_entries_per_call, config.max_log_message_bytes),
        }
    }

    /// Name of the module this state belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub(crate) fn limits(&mut self) -> &mut StoreLimits {
        &mut self.limits
    }

    pub(crate) fn wasi(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

fn build_wasi(caps: &WasiCapabilities) -> WasiP1Ctx {
    let mut builder = wasmtime_wasi::WasiCtxBuilder::new();
    if caps.stdout {
        builder.inherit_stdout();
    }
    if caps.stderr {
        builder.inherit_stderr();
    }
    for (key, value) in &caps.env_vars {
        builder.env(key, value);
    }
    builder.args(caps.args.as_slice());
    builder.build_p1()
}

/// Blueprint host functions.
///
/// Marker struct for organizing host function registration.
pub struct BlueprintHostFunctions;

impl BlueprintHostFunctions {
    /// Register all host functions with the wasmtime linker.
    pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
        Self::register_input_offset(linker)?;
        Self::register_input_length(linker)?;
        Self::register_params_handle(linker)?;
        Self::register_log(linker)?;
        Ok(())
    }

    /// Signature of a host function as `(i32 params, i32 results)`.
    pub(crate) fn signature(name: &str) -> Option<(usize, usize)> {
        HOST_FUNCTIONS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|&(_, params, results)| (params, results))
    }

    fn register_input_offset(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(HOST_MODULE, INPUT_OFFSET_IMPORT, |caller: Caller<'_, HostState>| -> i32 {
                caller
                    .data()
                    .frame
                    .map_or(NONE, |region| region.offset() as i32)
            })
            .map_err(|e| registration_error(INPUT_OFFSET_IMPORT, e))?;
        Ok(())
    }

    fn register_input_length(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(HOST_MODULE, INPUT_LENGTH_IMPORT, |caller: Caller<'_, HostState>| -> i32 {
                caller.data().frame.map_or(0, |region| region.len() as i32)
            })
            .map_err(|e| registration_error(INPUT_LENGTH_IMPORT, e))?;
        Ok(())
    }

    fn register_params_handle(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(HOST_MODULE, PARAMS_HANDLE_IMPORT, |caller: Caller<'_, HostState>| -> i32 {
                caller.data().params_handle.unwrap_or(NONE)
            })
            .map_err(|e| registration_error(PARAMS_HANDLE_IMPORT, e))?;
        Ok(())
    }

    fn register_log(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                HOST_MODULE,
                LOG_IMPORT,
                |mut caller: Caller<'_, HostState>,
                 level: i32,
                 ptr: i32,
                 len: i32|
                 -> wasmtime::Result<()> {
                    let log = &mut caller.data_mut().log;
                    if log.emitted >= log.max_entries {
                        log.dropped += 1;
                        return Ok(());
                    }
                    log.emitted += 1;
                    let max_bytes = log.max_bytes;

                    if len < 0 {
                        return Err(HostCallError(format!("log length {} is negative", len)).into());
                    }
                    let memory = get_memory(&mut caller)?;
                    let take = (len as usize).min(max_bytes);
                    let bytes = read_bytes(&memory, &caller, ptr, take)?;
                    let message = String::from_utf8_lossy(bytes);
                    let truncated = take < len as usize;
                    emit(level, caller.data().module(), &message, truncated);
                    Ok(())
                },
            )
            .map_err(|e| registration_error(LOG_IMPORT, e))?;
        Ok(())
    }
}

fn registration_error(name: &str, e: wasmtime::Error) -> BlueprintError {
    BlueprintError::Config(format!("failed to register host function {}: {}", name, e))
}

fn emit(level: i32, module: &str, message: &str, truncated: bool) {
    match level {
        l if l <= log_level::ERROR => {
            tracing::error!(target: BLUEPRINT_LOG_TARGET, module, truncated, "{}", message)
        }
        log_level::WARN => {
            tracing::warn!(target: BLUEPRINT_LOG_TARGET, module, truncated, "{}", message)
        }
        log_level::INFO => {
            tracing::info!(target: BLUEPRINT_LOG_TARGET, module, truncated, "{}", message)
        }
        log_level::DEBUG => {
            tracing::debug!(target: BLUEPRINT_LOG_TARGET, module, truncated, "{}", message)
        }
        _ => tracing::trace!(target: BLUEPRINT_LOG_TARGET, module, truncated, "{}", message),
    }
}

// ============================================================================
// Memory Access Helpers
// ============================================================================

/// Get the memory export from the caller.
fn get_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    caller
        .get_export(strainer_abi::contract::MEMORY_EXPORT)
        .and_then(|e| e.into_memory())
        .ok_or_else(|| HostCallError("no memory export found".to_string()).into())
}

/// Borrow `len` bytes at a module-supplied pointer, refusing anything outside
/// linear memory.
fn read_bytes<'a>(
    memory: &Memory,
    caller: &'a Caller<'_, HostState>,
    ptr: i32,
    len: usize,
) -> wasmtime::Result<&'a [u8]> {
    let data = memory.data(caller);
    usize::try_from(ptr)
        .ok()
        .and_then(|start| start.checked_add(len).map(|end| start..end))
        .and_then(|range| data.get(range))
        .ok_or_else(|| {
            HostCallError(format!(
                "memory read of {} bytes at {} out of bounds (memory is {} bytes)",
                len,
                ptr,
                data.len()
            ))
            .into()
        })
}
