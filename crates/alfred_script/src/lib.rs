//! Alfred Scripting
//!
//! JavaScript function files executed on pooled QuickJS runtimes.
//!
//! ## Architecture
//!
//! - **Pool:** [`RuntimePool`] hands out exclusive leases on ready runtimes,
//!   creates new ones up to `max_size`, blocks beyond that, and trims idle
//!   runtimes back to `min_size` in the background.
//! - **Runtime:** [`ScriptRuntime`] is one QuickJS context with `console`
//!   and `require` already wired in.
//! - **Functions:** [`ScriptFunction`] wraps a function file and dispatches
//!   its `updateHelpers` / `alfred` entry points through the pool.
//!
//! Build one [`ScriptPool`] at service start and share it via `Arc`.

pub mod config;
pub mod error;
pub mod function;
pub mod pool;
pub mod runtime;
pub mod shims;

pub use config::PoolConfig;
pub use error::{ErrorKind, ScriptError};
pub use function::{ScriptFunction, FUNC_ALFRED, FUNC_UPDATE_HELPERS};
pub use pool::{InstanceFactory, PoolError, PoolStats, PooledInstance, RuntimePool};
pub use runtime::{EngineError, ScriptRuntime, ScriptRuntimeFactory};
pub use shims::ModuleRegistry;

pub use rquickjs;

/// Pool of bootstrapped QuickJS runtimes.
pub type ScriptPool = RuntimePool<ScriptRuntimeFactory>;

/// Build a [`ScriptPool`] whose runtimes can `require` the given modules.
pub fn script_pool(config: &PoolConfig, modules: ModuleRegistry) -> Result<ScriptPool, PoolError> {
    RuntimePool::new(ScriptRuntimeFactory::new(std::sync::Arc::new(modules)), config)
}
