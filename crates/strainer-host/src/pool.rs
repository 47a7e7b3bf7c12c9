//! A bounded pool of configured instances for parallel workers.
//!
//! Instances are never shared: a worker checks one out, owns it for as many
//! calls as it likes, and returns it by dropping the guard. Instances that
//! faulted are discarded on return and replaced lazily.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BlueprintError, Result};
use crate::wasm::{CompiledModule, ModuleInstance};

/// Bounded pool of instances of one module, all configured with the same
/// parameters.
#[derive(Clone)]
pub struct InstancePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    module: CompiledModule,
    params: Vec<u8>,
    max_instances: usize,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<ModuleInstance>,
    checked_out: usize,
}

/// Pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Instances waiting for a worker
    pub idle: usize,
    /// Instances held by workers
    pub checked_out: usize,
    /// Upper bound on checked-out instances
    pub max_instances: usize,
}

impl InstancePool {
    /// Create an empty pool. Instances are created on demand.
    pub fn new(module: CompiledModule, params: impl Into<Vec<u8>>, max_instances: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                module,
                params: params.into(),
                max_instances,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Take an instance, reusing an idle one or creating and configuring a
    /// new one.
    pub fn checkout(&self) -> Result<PooledInstance> {
        let reused = {
            let mut state = self.lock();
            if state.checked_out >= self.inner.max_instances {
                return Err(BlueprintError::ResourceExhausted(format!(
                    "all {} instances of '{}' are checked out",
                    self.inner.max_instances,
                    self.inner.module.name()
                )));
            }
            state.checked_out += 1;
            state.idle.pop()
        };

        let instance = match reused {
            Some(instance) => instance,
            None => match self.create() {
                Ok(instance) => instance,
                Err(e) => {
                    self.lock().checked_out -= 1;
                    return Err(e);
                }
            },
        };

        Ok(PooledInstance {
            instance: Some(instance),
            pool: self.inner.clone(),
        })
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            max_instances: self.inner.max_instances,
        }
    }

    /// Module the pool instantiates.
    pub fn module(&self) -> &CompiledModule {
        &self.inner.module
    }

    fn create(&self) -> Result<ModuleInstance> {
        let mut instance = self.inner.module.instantiate()?;
        instance.configure(&self.inner.params)?;
        tracing::debug!(module = self.inner.module.name(), "pool instance created");
        Ok(instance)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.lock()
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool bookkeeping stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An instance checked out of an [`InstancePool`].
///
/// Returned to the pool on drop if it is still usable.
pub struct PooledInstance {
    instance: Option<ModuleInstance>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledInstance").finish_non_exhaustive()
    }
}

impl Deref for PooledInstance {
    type Target = ModuleInstance;

    fn deref(&self) -> &ModuleInstance {
        self.instance.as_ref().expect("instance present until drop")
    }
}

impl DerefMut for PooledInstance {
    fn deref_mut(&mut self) -> &mut ModuleInstance {
        self.instance.as_mut().expect("instance present until drop")
    }
}

impl Drop for PooledInstance {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let reusable = instance.is_usable() && instance.params_handle().is_some();
        let mut state = self.pool.lock();
        state.checked_out -= 1;
        if reusable {
            state.idle.push(instance);
        } else {
            tracing::debug!(
                module = self.pool.module.name(),
                state = ?instance.state(),
                "discarding pool instance"
            );
        }
    }
}
