//! Pooled isolated execution units with composable injected scopes.
//!
//! An [`ExecutionUnit`] wraps one isolated-execution primitive built from
//! serialized program text, composed from a main fragment plus named
//! helper fragments that can be loaded and removed at runtime (each
//! mutation rebuilds the primitive). A [`WorkerPool`] owns an ordered
//! collection of units and drives them together: broadcast dispatch,
//! shared-behavior extension, and aggregate run-and-resolve with
//! first-failure-wins settlement.
//!
//! The host's isolation primitive is reached through the
//! [`IsolateBackend`] / [`IsolateHandle`] traits; [`NativeBackend`] ships
//! as the built-in implementation, running closures registered through a
//! [`FnRegistry`] on dedicated tokio tasks.
//!
//! ```no_run
//! use isopool::{FnRegistry, NativeBackend, PoolConfig, WorkerPool};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = FnRegistry::new();
//! let backend = Arc::new(NativeBackend::new(registry.clone()));
//! let pool = WorkerPool::new(backend, PoolConfig::default());
//!
//! let double = registry.serialize_program(|msg, _scope| {
//!     Ok(json!(msg.data.as_i64().unwrap_or(0) * 2))
//! });
//! pool.create(&double)?;
//!
//! let results = pool.run_all(json!(21)).await?;
//! assert_eq!(results[0].data, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod behavior;
pub mod config;
pub mod error;
pub mod message;
pub mod pool;
pub mod source;
pub mod unit;

pub use backend::{FnRegistry, IsolateBackend, IsolateHandle, NativeBackend, Scope};
pub use behavior::{SharedBehavior, RESERVED_FIELDS};
pub use config::PoolConfig;
pub use error::{
    ErrorInfo, PoolError, UnitError, CODE_NO_CAPABILITY_NO_FALLBACK, CODE_UNIT_ERROR,
};
pub use message::{Message, MessageResult};
pub use pool::WorkerPool;
pub use source::ScopeSource;
pub use unit::{ExecutionUnit, UnitState};
