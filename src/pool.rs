// Worker pool: factory, registry, and broadcast controller over units

use crate::backend::IsolateBackend;
use crate::behavior::{SharedBehavior, SharedCompleteFn, SharedFailureFn};
use crate::config::PoolConfig;
use crate::error::{ErrorInfo, PoolError};
use crate::message::{Message, MessageResult};
use crate::unit::{ExecutionUnit, FallbackFn, MemberList};
use futures::future;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Factory, registry, and broadcast controller over execution units.
///
/// Membership is insertion-ordered: broadcast and `run_all` iterate in
/// creation order. All bookkeeping happens on the caller's thread; the
/// units themselves run concurrently on their own tasks.
pub struct WorkerPool {
    backend: Arc<dyn IsolateBackend>,
    config: PoolConfig,
    shared: Arc<SharedBehavior>,
    members: MemberList,
}

impl WorkerPool {
    pub fn new(backend: Arc<dyn IsolateBackend>, config: PoolConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(SharedBehavior::default()),
            members: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build a unit from a serialized main fragment and register it.
    pub fn create(&self, main: &str) -> Result<ExecutionUnit, PoolError> {
        self.create_inner(main, None)
    }

    /// Like `create`, with a fallback closure invoked on the caller's
    /// thread when isolated execution is unavailable.
    pub fn create_with_fallback<F>(&self, main: &str, fallback: F) -> Result<ExecutionUnit, PoolError>
    where
        F: Fn(Message) -> Value + Send + Sync + 'static,
    {
        self.create_inner(main, Some(Arc::new(fallback)))
    }

    fn create_inner(
        &self,
        main: &str,
        fallback: Option<FallbackFn>,
    ) -> Result<ExecutionUnit, PoolError> {
        let unit = ExecutionUnit::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.shared),
            Arc::downgrade(&self.members),
            main,
            fallback,
            &self.config,
        )?;
        self.members.lock().push(unit.clone());
        Ok(unit)
    }

    /// Merge fields into the shared behavior, visible immediately to
    /// every existing and future unit of this pool. Reserved mechanic
    /// names are refused.
    pub fn extend<I>(&self, partial: I) -> Result<&Self, PoolError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.shared.extend(partial)?;
        Ok(self)
    }

    /// Default completion handler for units whose own slot is empty.
    pub fn set_default_on_complete(&self, handler: SharedCompleteFn) -> &Self {
        self.shared.set_on_complete(handler);
        self
    }

    /// Default failure handler for units whose own slot is empty.
    pub fn set_default_on_failure(&self, handler: SharedFailureFn) -> &Self {
        self.shared.set_on_failure(handler);
        self
    }

    /// Fire-and-forget broadcast in creation order, wiring each unit's
    /// reply to whatever callback slots are currently set on it.
    /// Per-unit dispatch errors are logged, not returned.
    pub fn post_message(&self, data: Value) -> &Self {
        let members: Vec<ExecutionUnit> = self.members.lock().clone();
        for unit in members {
            if let Err(err) = unit.post_message(data.clone()) {
                tracing::warn!(unit = %unit.id(), "broadcast dispatch failed: {}", err);
            }
        }
        self
    }

    /// Dispatch to every member in creation order and await all of them.
    ///
    /// Resolves with one result per member, ordered by creation order
    /// regardless of completion order. Rejects on the first observed
    /// failure without cancelling in-flight siblings.
    pub async fn run_all(&self, data: Value) -> Result<Vec<MessageResult>, ErrorInfo> {
        let round_trips: Vec<_> = {
            let members = self.members.lock();
            members.iter().map(|unit| unit.run(data.clone())).collect()
        };
        future::try_join_all(round_trips).await
    }

    /// Terminate one member, located by identity.
    pub fn terminate(&self, unit: &ExecutionUnit) {
        unit.terminate();
    }

    /// Terminate every member and empty the membership list.
    pub fn terminate_all(&self) {
        let drained: Vec<ExecutionUnit> = {
            let mut members = self.members.lock();
            members.drain(..).collect()
        };
        for unit in drained {
            unit.terminate();
        }
    }

    /// Live membership, in creation order.
    pub fn list(&self) -> Vec<ExecutionUnit> {
        self.members.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FnRegistry, NativeBackend};
    use serde_json::json;

    fn echo_pool() -> (WorkerPool, FnRegistry) {
        let registry = FnRegistry::new();
        let backend = Arc::new(NativeBackend::new(registry.clone()));
        (WorkerPool::new(backend, PoolConfig::default()), registry)
    }

    #[tokio::test]
    async fn create_appends_exactly_one_unit() {
        let (pool, registry) = echo_pool();
        let main = registry.serialize_program(|msg, _| Ok(msg.data));

        assert!(pool.is_empty());
        let first = pool.create(&main).unwrap();
        assert_eq!(pool.len(), 1);
        let second = pool.create(&main).unwrap();
        assert_eq!(pool.len(), 2);

        let list = pool.list();
        assert!(list[0].same_unit(&first));
        assert!(list[1].same_unit(&second));
    }

    #[tokio::test]
    async fn terminate_removes_by_identity_and_is_idempotent() {
        let (pool, registry) = echo_pool();
        let main = registry.serialize_program(|msg, _| Ok(msg.data));

        let first = pool.create(&main).unwrap();
        let second = pool.create(&main).unwrap();

        pool.terminate(&first);
        let list = pool.list();
        assert_eq!(list.len(), 1);
        assert!(list[0].same_unit(&second));

        first.terminate();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn terminate_all_empties_the_pool() {
        let (pool, registry) = echo_pool();
        let main = registry.serialize_program(|msg, _| Ok(msg.data));
        pool.create(&main).unwrap();
        pool.create(&main).unwrap();

        pool.terminate_all();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn extend_is_visible_to_existing_and_future_units() {
        let (pool, registry) = echo_pool();
        let main = registry.serialize_program(|msg, _| Ok(msg.data));

        let first = pool.create(&main).unwrap();
        let second = pool.create(&main).unwrap();
        pool.extend(vec![("x".to_string(), json!(1))]).unwrap();
        let third = pool.create(&main).unwrap();

        assert_eq!(first.field("x"), Some(json!(1)));
        assert_eq!(second.field("x"), Some(json!(1)));
        assert_eq!(third.field("x"), Some(json!(1)));

        first.set_field("x", json!(2));
        assert_eq!(first.field("x"), Some(json!(2)));
        assert_eq!(second.field("x"), Some(json!(1)));
        assert_eq!(third.field("x"), Some(json!(1)));
    }

    #[tokio::test]
    async fn extend_refuses_reserved_mechanics() {
        let (pool, _registry) = echo_pool();
        let result = pool.extend(vec![("postMessage".to_string(), json!("shadow"))]);
        assert!(matches!(result, Err(PoolError::ReservedField(_))));
    }
}
