//! Configuration for the blueprint runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strainer_abi::AbiConfig;

use crate::error::{BlueprintError, Result};

/// Size of one WebAssembly page.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// WASI preview1 grants for blueprints built against a WASI target.
///
/// Following the deny-by-default model, everything starts disabled. The
/// filesystem and network are never offered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Allow writes to the host's stdout
    pub stdout: bool,

    /// Allow writes to the host's stderr
    pub stderr: bool,

    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,

    /// Command-line arguments to pass
    pub args: Vec<String>,
}

impl WasiCapabilities {
    /// Create capabilities with nothing allowed
    pub fn none() -> Self {
        Self::default()
    }

    /// Create capabilities with stdout/stderr inherited
    pub fn with_stdio() -> Self {
        Self {
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for the blueprint runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueprintConfig {
    /// WASI preview1 linkage; `None` refuses modules importing WASI
    pub wasi: Option<WasiCapabilities>,

    /// Maximum linear memory per instance in bytes, arena included
    pub max_memory: usize,

    /// Pages reserved at the end of each instance's memory for marshalling
    pub arena_pages: u32,

    /// Fuel granted to each call into the module (`None` = unmetered)
    pub fuel_per_call: Option<u64>,

    /// Wall-clock budget per call in milliseconds (0 = unlimited)
    pub call_timeout_ms: u64,

    /// Epoch tick interval in milliseconds; bounds timeout precision
    pub epoch_tick_ms: u64,

    /// Log entries a module may emit per call
    pub max_log_entries_per_call: usize,

    /// Longest log message kept, in bytes
    pub max_log_message_bytes: usize,

    /// Cranelift optimization level (0-2)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Record layout parameters
    pub abi: AbiConfig,

    /// wasmtime cache configuration file
    pub cache_path: Option<PathBuf>,
}

impl Default for BlueprintConfig {
    fn default() -> Self {
        Self {
            wasi: None,
            max_memory: 64 * 1024 * 1024, // 64 MB
            arena_pages: 4,                // 256 KB
            fuel_per_call: Some(10_000_000),
            call_timeout_ms: 1_000,
            epoch_tick_ms: 10,
            max_log_entries_per_call: 32,
            max_log_message_bytes: 1024,
            optimization_level: 2,
            enable_simd: true,
            abi: AbiConfig::default(),
            cache_path: None,
        }
    }
}

impl BlueprintConfig {
    /// Tight limits for untrusted blueprints
    pub fn strict() -> Self {
        Self {
            max_memory: 16 * 1024 * 1024, // 16 MB
            arena_pages: 1,
            fuel_per_call: Some(1_000_000),
            call_timeout_ms: 100,
            max_log_entries_per_call: 4,
            max_log_message_bytes: 256,
            ..Default::default()
        }
    }

    /// Config for developing a blueprint: stdio, verbose logs, fast compiles
    pub fn development() -> Self {
        Self {
            wasi: Some(WasiCapabilities::with_stdio()),
            call_timeout_ms: 10_000,
            max_log_entries_per_call: 1024,
            max_log_message_bytes: 16 * 1024,
            optimization_level: 0,
            ..Default::default()
        }
    }

    /// Builder: enable WASI with the given capabilities
    pub fn wasi(mut self, caps: WasiCapabilities) -> Self {
        self.wasi = Some(caps);
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set arena size in pages
    pub fn arena_pages(mut self, pages: u32) -> Self {
        self.arena_pages = pages;
        self
    }

    /// Builder: set fuel per call
    pub fn fuel_per_call(mut self, fuel: u64) -> Self {
        self.fuel_per_call = Some(fuel);
        self
    }

    /// Builder: disable fuel metering
    pub fn unmetered(mut self) -> Self {
        self.fuel_per_call = None;
        self
    }

    /// Builder: set the wall-clock budget per call (zero disables it)
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder: set the epoch tick interval
    pub fn epoch_tick(mut self, tick: Duration) -> Self {
        self.epoch_tick_ms = tick.as_millis() as u64;
        self
    }

    /// Builder: set ABI parameters
    pub fn abi(mut self, abi: AbiConfig) -> Self {
        self.abi = abi;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(2);
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Wall-clock budget per call, if any.
    pub fn call_timeout_duration(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    /// Epoch tick interval.
    pub fn epoch_tick_duration(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms)
    }

    /// Epoch deadline, in ticks, that covers the call budget.
    ///
    /// One tick is added because the first tick may land right after the
    /// deadline is armed.
    pub fn epoch_deadline_ticks(&self) -> Option<u64> {
        if self.call_timeout_ms == 0 {
            return None;
        }
        Some(self.call_timeout_ms.div_ceil(self.epoch_tick_ms.max(1)) + 1)
    }

    /// Arena size in bytes.
    pub fn arena_bytes(&self) -> u64 {
        self.arena_pages as u64 * WASM_PAGE_SIZE
    }

    /// Reject combinations the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.arena_pages == 0 {
            return Err(BlueprintError::Config("arena_pages must be at least 1".to_string()));
        }
        if self.arena_bytes() > self.max_memory as u64 {
            return Err(BlueprintError::Config(format!(
                "arena ({} bytes) does not fit in max_memory ({} bytes)",
                self.arena_bytes(),
                self.max_memory
            )));
        }
        if self.call_timeout_ms > 0 && self.epoch_tick_ms == 0 {
            return Err(BlueprintError::Config(
                "epoch_tick_ms must be positive when call_timeout_ms is set".to_string(),
            ));
        }
        if self.fuel_per_call == Some(0) {
            return Err(BlueprintError::Config(
                "fuel_per_call of 0 would trap every call; use unmetered() instead".to_string(),
            ));
        }
        Ok(())
    }
}
