//! Compiled blueprints and the load-time interface check.

use std::fmt;
use std::sync::Arc;

use strainer_abi::contract::{HOST_MODULE, MEMORY_EXPORT, REQUIRED_FUNCTIONS};
use wasmtime::{ExternType, FuncType, InstancePre, Module, ValType};

use super::host_functions::{BlueprintHostFunctions, HostState};
use super::instance::ModuleInstance;
use super::runtime::RuntimeShared;
use crate::error::{BlueprintError, Result};

/// Import namespace of WASI preview1.
pub(crate) const WASI_PREVIEW1_MODULE: &str = "wasi_snapshot_preview1";

/// A validated, pre-linked blueprint.
///
/// Cheap to clone; every clone shares the compiled code. Instances created
/// from it are fully independent.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    name: Arc<str>,
    module: Module,
    pre: InstancePre<HostState>,
    min_pages: u64,
    max_pages: Option<u64>,
    shared: Arc<RuntimeShared>,
}

impl CompiledModule {
    pub(crate) fn new(
        name: &str,
        module: Module,
        pre: InstancePre<HostState>,
        shared: Arc<RuntimeShared>,
    ) -> Result<Self> {
        let memory = module
            .exports()
            .find(|e| e.name() == MEMORY_EXPORT)
            .and_then(|e| e.ty().memory().cloned())
            .ok_or_else(|| {
                BlueprintError::UnsupportedInterface(format!("'{}' is not exported", MEMORY_EXPORT))
            })?;

        Ok(Self {
            inner: Arc::new(ModuleInner {
                name: Arc::from(name),
                module,
                pre,
                min_pages: memory.minimum(),
                max_pages: memory.maximum(),
                shared,
            }),
        })
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.inner.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Imported functions as `namespace::name`.
    pub fn imports(&self) -> impl Iterator<Item = String> + '_ {
        self.inner
            .module
            .imports()
            .map(|i| format!("{}::{}", i.module(), i.name()))
    }

    /// Declared minimum memory in pages.
    pub fn min_memory_pages(&self) -> u64 {
        self.inner.min_pages
    }

    /// Declared maximum memory in pages, if any.
    pub fn max_memory_pages(&self) -> Option<u64> {
        self.inner.max_pages
    }

    /// Create a fresh instance.
    pub fn instantiate(&self) -> Result<ModuleInstance> {
        ModuleInstance::new(self.clone())
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.inner.name.clone()
    }

    pub(crate) fn pre(&self) -> &InstancePre<HostState> {
        &self.inner.pre
    }

    pub(crate) fn shared(&self) -> &RuntimeShared {
        &self.inner.shared
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.inner.name)
            .field("min_pages", &self.inner.min_pages)
            .field("max_pages", &self.inner.max_pages)
            .finish_non_exhaustive()
    }
}

/// Check the exports and imports of `module` against the blueprint contract.
pub(crate) fn validate_interface(module: &Module, allow_wasi: bool) -> Result<()> {
    for name in REQUIRED_FUNCTIONS {
        let export = module.exports().find(|e| e.name() == name);
        match export.map(|e| e.ty()) {
            Some(ExternType::Func(ty)) if is_signature(&ty, 0, 1) => {}
            Some(ExternType::Func(ty)) => {
                return Err(unsupported(format!(
                    "export '{}' must be () -> i32, found {}",
                    name,
                    describe(&ty)
                )))
            }
            Some(_) => return Err(unsupported(format!("export '{}' is not a function", name))),
            None => return Err(unsupported(format!("missing export '{}'", name))),
        }
    }

    match module.exports().find(|e| e.name() == MEMORY_EXPORT).map(|e| e.ty()) {
        Some(ExternType::Memory(mem)) if mem.is_64() => {
            return Err(unsupported("64-bit memories are not supported".to_string()))
        }
        Some(ExternType::Memory(mem)) if mem.is_shared() => {
            return Err(unsupported("shared memories are not supported".to_string()))
        }
        Some(ExternType::Memory(_)) => {}
        _ => return Err(unsupported(format!("missing memory export '{}'", MEMORY_EXPORT))),
    }

    for import in module.imports() {
        let ns = import.module();
        let name = import.name();
        if ns == WASI_PREVIEW1_MODULE {
            if allow_wasi {
                continue;
            }
            return Err(unsupported(format!(
                "import '{}::{}' requires WASI, which is disabled",
                ns, name
            )));
        }
        if ns != HOST_MODULE {
            return Err(unsupported(format!("import '{}::{}' is not provided", ns, name)));
        }

        let Some((params, results)) = BlueprintHostFunctions::signature(name) else {
            return Err(unsupported(format!("unknown host function '{}::{}'", ns, name)));
        };
        match import.ty() {
            ExternType::Func(ty) if is_signature(&ty, params, results) => {}
            ExternType::Func(ty) => {
                return Err(unsupported(format!(
                    "host function '{}' has signature {}, expected {} i32 param(s) and {} i32 result(s)",
                    name,
                    describe(&ty),
                    params,
                    results
                )))
            }
            _ => return Err(unsupported(format!("import '{}::{}' is not a function", ns, name))),
        }
    }

    Ok(())
}

fn unsupported(msg: String) -> BlueprintError {
    BlueprintError::UnsupportedInterface(msg)
}

fn is_signature(ty: &FuncType, params: usize, results: usize) -> bool {
    ty.params().len() == params
        && ty.results().len() == results
        && ty.params().chain(ty.results()).all(|v| matches!(v, ValType::I32))
}

fn describe(ty: &FuncType) -> String {
    let list = |types: &mut dyn Iterator<Item = ValType>| {
        types.map(|t| format!("{}", t)).collect::<Vec<_>>().join(", ")
    };
    format!("({}) -> ({})", list(&mut ty.params()), list(&mut ty.results()))
}
