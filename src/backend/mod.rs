// Isolated-execution collaborators: capability probe, factory, live handle

pub mod native;

use crate::error::{PoolError, UnitError};
use serde_json::Value;
use tokio::sync::oneshot;

// Re-export commonly used types
pub use native::{FnRegistry, NativeBackend, Scope};

/// One live isolated execution instance.
///
/// `send` hands one message to the running program; the reply for that
/// round trip arrives on the returned receiver. A receiver that resolves
/// to `Err(RecvError)` means the round trip was abandoned (the instance
/// was stopped or rebuilt while the message was in flight).
pub trait IsolateHandle: Send {
    fn send(&mut self, data: Value) -> oneshot::Receiver<Result<Value, UnitError>>;

    /// Stop the instance. Idempotent.
    fn stop(&mut self);
}

/// Capability probe plus factory for isolated execution instances.
pub trait IsolateBackend: Send + Sync {
    /// Whether this environment can run isolated units at all.
    fn supports_isolation(&self) -> bool;

    /// Build and start an instance from fully assembled program text.
    fn spawn(&self, program: &str) -> Result<Box<dyn IsolateHandle>, PoolError>;
}
