//! Blueprint runtime built on wasmtime.
//!
//! Uses wasmtime-wasi preview1 for blueprints compiled against a WASI target.

use super::config::BlueprintConfig;
use super::host_functions::{BlueprintHostFunctions, HostState};
use super::instance::ModuleInstance;
use super::module::{validate_interface, CompiledModule};
use crate::error::{BlueprintError, Result};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wasmtime::*;

/// Loads blueprints and creates their instances.
///
/// One runtime owns one wasmtime `Engine`. Compiled modules keep the engine
/// (and the epoch ticker, when a wall-clock budget is configured) alive, so
/// the runtime itself may be dropped while modules are still in use.
pub struct BlueprintRuntime {
    shared: Arc<RuntimeShared>,
    linker: Linker<HostState>,
}

/// State shared by the runtime and every module it compiled.
pub(crate) struct RuntimeShared {
    pub(crate) engine: Engine,
    pub(crate) config: BlueprintConfig,
    _ticker: Option<EpochTicker>,
}

/// Background thread advancing the engine epoch.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, tick: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("strainer-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    engine.increment_epoch();
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl BlueprintRuntime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: BlueprintConfig) -> Result<Self> {
        config.validate()?;

        let mut engine_config = Config::new();

        // Configure optimization
        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            _ => OptLevel::Speed,
        });

        engine_config.wasm_simd(config.enable_simd);
        engine_config.wasm_relaxed_simd(config.enable_simd);

        // Blueprints get exactly one single-threaded 32-bit memory
        engine_config.wasm_threads(false);
        engine_config.wasm_memory64(false);

        // Step budget
        if config.fuel_per_call.is_some() {
            engine_config.consume_fuel(true);
        }

        // Wall-clock budget
        if config.call_timeout_duration().is_some() {
            engine_config.epoch_interruption(true);
        }

        // Configure caching if path provided
        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| BlueprintError::Config(format!("engine creation failed: {}", e)))?;

        let ticker = match config.call_timeout_duration() {
            Some(_) => Some(EpochTicker::start(engine.clone(), config.epoch_tick_duration())?),
            None => None,
        };

        let mut linker: Linker<HostState> = Linker::new(&engine);
        if config.wasi.is_some() {
            wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.wasi())
                .map_err(|e| BlueprintError::Config(format!("WASI link failed: {}", e)))?;
        }
        BlueprintHostFunctions::register(&mut linker)?;

        tracing::debug!(
            fuel_per_call = ?config.fuel_per_call,
            call_timeout_ms = config.call_timeout_ms,
            arena_pages = config.arena_pages,
            wasi = config.wasi.is_some(),
            "blueprint runtime created"
        );

        Ok(Self {
            shared: Arc::new(RuntimeShared {
                engine,
                config,
                _ticker: ticker,
            }),
            linker,
        })
    }

    /// Compile and validate a blueprint from bytes (binary or WAT).
    pub fn load(&self, name: &str, bytes: &[u8]) -> Result<CompiledModule> {
        let module = Module::new(&self.shared.engine, bytes)
            .map_err(|e| BlueprintError::InvalidModule(format!("{}: {:#}", name, e)))?;

        validate_interface(&module, self.shared.config.wasi.is_some())?;

        let pre = self
            .linker
            .instantiate_pre(&module)
            .map_err(|e| BlueprintError::UnsupportedInterface(format!("{}: {:#}", name, e)))?;

        let compiled = CompiledModule::new(name, module, pre, self.shared.clone())?;
        tracing::debug!(
            module = name,
            min_pages = compiled.min_memory_pages(),
            "blueprint loaded"
        );
        Ok(compiled)
    }

    /// Compile and validate a blueprint from a file. The module is named
    /// after the file stem.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<CompiledModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let bytes = std::fs::read(path)?;
        self.load(&name, &bytes)
    }

    /// Create a fresh instance of `module`.
    pub fn instantiate(&self, module: &CompiledModule) -> Result<ModuleInstance> {
        module.instantiate()
    }

    /// Get the configuration.
    pub fn config(&self) -> &BlueprintConfig {
        &self.shared.config
    }
}
