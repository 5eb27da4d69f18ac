// Execution unit: one isolated program instance and its communication surface

use crate::backend::{IsolateBackend, IsolateHandle};
use crate::behavior::SharedBehavior;
use crate::config::PoolConfig;
use crate::error::{ErrorInfo, PoolError, UnitError};
use crate::message::{Message, MessageResult};
use crate::source::ScopeSource;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Completion callback slot.
pub type CompleteFn = Box<dyn FnMut(MessageResult) + Send>;

/// Failure callback slot.
pub type FailureFn = Box<dyn FnMut(ErrorInfo) + Send>;

/// Fallback invoked synchronously on the caller's thread when isolated
/// execution is unavailable.
pub type FallbackFn = Arc<dyn Fn(Message) -> Value + Send + Sync>;

/// Lifecycle state. `Ready` and `Dispatched` are re-enterable;
/// `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Ready,
    Dispatched,
    Terminated,
}

pub(crate) type MemberList = Arc<Mutex<Vec<ExecutionUnit>>>;

struct UnitInner {
    id: Uuid,
    backend: Arc<dyn IsolateBackend>,
    supports_isolated_execution: bool,
    fallback: Option<FallbackFn>,
    shared: Arc<SharedBehavior>,
    members: Weak<Mutex<Vec<ExecutionUnit>>>,
    state: Mutex<UnitState>,
    scope: Mutex<ScopeSource>,
    handle: Mutex<Option<Box<dyn IsolateHandle>>>,
    fields: Mutex<HashMap<String, Value>>,
    on_complete: Mutex<Option<CompleteFn>>,
    on_failure: Mutex<Option<FailureFn>>,
    completions: broadcast::Sender<MessageResult>,
}

/// Handle to one isolated program instance.
///
/// Cheap to clone; clones share identity, and identity (not value) is
/// what membership removal compares. Dispatch requires a tokio runtime:
/// reply routing runs on a spawned task.
#[derive(Clone)]
pub struct ExecutionUnit {
    inner: Arc<UnitInner>,
}

impl ExecutionUnit {
    pub(crate) fn new(
        backend: Arc<dyn IsolateBackend>,
        shared: Arc<SharedBehavior>,
        members: Weak<Mutex<Vec<ExecutionUnit>>>,
        main: &str,
        fallback: Option<FallbackFn>,
        config: &PoolConfig,
    ) -> Result<Self, PoolError> {
        let supports = !config.force_fallback && backend.supports_isolation();
        let scope = ScopeSource::new(main);
        let handle = if supports {
            Some(backend.spawn(&scope.assemble())?)
        } else {
            None
        };
        let (completions, _) = broadcast::channel(config.completion_feed_capacity.max(1));

        let unit = Self {
            inner: Arc::new(UnitInner {
                id: Uuid::new_v4(),
                backend,
                supports_isolated_execution: supports,
                fallback,
                shared,
                members,
                state: Mutex::new(UnitState::Ready),
                scope: Mutex::new(scope),
                handle: Mutex::new(handle),
                fields: Mutex::new(HashMap::new()),
                on_complete: Mutex::new(None),
                on_failure: Mutex::new(None),
                completions,
            }),
        };
        tracing::debug!(unit = %unit.inner.id, isolated = supports, "created execution unit");
        Ok(unit)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn supports_isolated_execution(&self) -> bool {
        self.inner.supports_isolated_execution
    }

    pub fn state(&self) -> UnitState {
        *self.inner.state.lock()
    }

    /// Identity comparison: clones of one unit compare equal, distinct
    /// units never do.
    pub fn same_unit(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Assign the completion slot.
    pub fn set_on_complete<F>(&self, callback: F)
    where
        F: FnMut(MessageResult) + Send + 'static,
    {
        *self.inner.on_complete.lock() = Some(Box::new(callback));
    }

    /// Assign the failure slot.
    pub fn set_on_failure<F>(&self, callback: F)
    where
        F: FnMut(ErrorInfo) + Send + 'static,
    {
        *self.inner.on_failure.lock() = Some(Box::new(callback));
    }

    /// Completion feed. Every settled completion is also broadcast here;
    /// dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageResult> {
        self.inner.completions.subscribe()
    }

    /// Unit-local field, falling back to the pool's shared behavior.
    pub fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.inner.fields.lock().get(name).cloned() {
            return Some(value);
        }
        self.inner.shared.field(name)
    }

    /// Set a unit-local field, overriding the shared default for this
    /// unit only.
    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.inner.fields.lock().insert(name.into(), value);
    }

    /// Dispatch one message. The reply routes to this unit's callback
    /// slots, falling back to the pool's shared defaults.
    ///
    /// Under fallback mode the round trip is synchronous: the fallback's
    /// return value (or, with no fallback, the structured
    /// `no-capability-no-fallback` payload) is delivered to the
    /// completion slot before this call returns. The no-fallback case
    /// reports; it never errors.
    pub fn post_message(&self, data: Value) -> Result<(), PoolError> {
        self.ensure_live()?;

        if !self.inner.supports_isolated_execution {
            let result = self.fallback_round_trip(data);
            self.deliver_complete(result);
            return Ok(());
        }

        let reply = self.dispatch(data)?;
        let unit = self.clone();
        tokio::spawn(async move {
            match reply.await {
                Ok(Ok(value)) => {
                    unit.settle();
                    unit.deliver_complete(MessageResult::new(value));
                }
                Ok(Err(err)) => {
                    unit.settle();
                    unit.deliver_failure(ErrorInfo::from(err));
                }
                Err(_) => {
                    tracing::debug!(unit = %unit.inner.id, "round trip abandoned before settlement");
                }
            }
        });
        Ok(())
    }

    /// Single dispatch-and-await round trip, bypassing the callback
    /// slots. Dispatch happens eagerly at call time; the returned future
    /// resolves with this round trip's reply.
    ///
    /// Capability absence resolves (with the fallback's value or the
    /// structured error payload); primitive failure rejects with an
    /// `unit-error` payload.
    pub fn run(&self, data: Value) -> impl Future<Output = Result<MessageResult, ErrorInfo>> + Send + 'static {
        enum Started {
            Immediate(Result<MessageResult, ErrorInfo>),
            Pending(oneshot::Receiver<Result<Value, UnitError>>),
        }

        let started = if self.ensure_live().is_err() {
            Started::Immediate(Err(ErrorInfo::unit_error("unit has been terminated")))
        } else if !self.inner.supports_isolated_execution {
            Started::Immediate(Ok(self.fallback_round_trip(data)))
        } else {
            match self.dispatch(data) {
                Ok(reply) => Started::Pending(reply),
                Err(err) => Started::Immediate(Err(ErrorInfo::unit_error(err.to_string()))),
            }
        };

        let unit = self.clone();
        async move {
            match started {
                Started::Immediate(result) => result,
                Started::Pending(reply) => match reply.await {
                    Ok(Ok(value)) => {
                        unit.settle();
                        let result = MessageResult::new(value);
                        let _ = unit.inner.completions.send(result.clone());
                        Ok(result)
                    }
                    Ok(Err(err)) => {
                        unit.settle();
                        Err(ErrorInfo::from(err))
                    }
                    Err(_) => Err(ErrorInfo::unit_error("worker stopped before replying")),
                },
            }
        }
    }

    /// Inject named helper fragments and rebuild the primitive.
    ///
    /// Pairs are prepended in argument order, so the final fragment order
    /// is the reverse of the argument order. Not safe to interleave with
    /// an in-flight dispatch: rebuilding abandons that round trip.
    pub fn load_scripts<I, N, B>(&self, pairs: I) -> Result<&Self, PoolError>
    where
        I: IntoIterator<Item = (N, B)>,
        N: Into<String>,
        B: Into<String>,
    {
        self.ensure_live()?;
        {
            let mut scope = self.inner.scope.lock();
            for (name, body) in pairs {
                scope.load(name, body);
            }
        }
        self.rebuild()?;
        Ok(self)
    }

    /// Excise previously loaded helpers and rebuild the primitive.
    /// Unknown names are a silent no-op.
    pub fn remove_scripts(&self, names: &[&str]) -> Result<&Self, PoolError> {
        self.ensure_live()?;
        {
            let mut scope = self.inner.scope.lock();
            for name in names {
                if !scope.remove(name) {
                    tracing::debug!(unit = %self.inner.id, name, "remove_scripts: name not loaded");
                }
            }
        }
        self.rebuild()?;
        Ok(self)
    }

    /// Flat fragment view of this unit's scope source.
    pub fn scope_fragments(&self) -> Vec<String> {
        self.inner
            .scope
            .lock()
            .fragments()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Stop the primitive and deregister from the owning pool's
    /// membership list. Idempotent; a no-op primitive stop under
    /// fallback mode.
    pub fn terminate(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == UnitState::Terminated {
                return;
            }
            *state = UnitState::Terminated;
        }

        if let Some(mut handle) = self.inner.handle.lock().take() {
            handle.stop();
        }
        if let Some(members) = self.inner.members.upgrade() {
            members.lock().retain(|member| !member.same_unit(self));
        }
        tracing::debug!(unit = %self.inner.id, "terminated execution unit");
    }

    fn ensure_live(&self) -> Result<(), PoolError> {
        if *self.inner.state.lock() == UnitState::Terminated {
            Err(PoolError::Terminated)
        } else {
            Ok(())
        }
    }

    fn dispatch(&self, data: Value) -> Result<oneshot::Receiver<Result<Value, UnitError>>, PoolError> {
        let mut handle = self.inner.handle.lock();
        let handle = handle.as_mut().ok_or(PoolError::Terminated)?;
        *self.inner.state.lock() = UnitState::Dispatched;
        Ok(handle.send(data))
    }

    fn settle(&self) {
        let mut state = self.inner.state.lock();
        if *state == UnitState::Dispatched {
            *state = UnitState::Ready;
        }
    }

    fn fallback_round_trip(&self, data: Value) -> MessageResult {
        match &self.inner.fallback {
            Some(fallback) => MessageResult::new(fallback(Message::new(data))),
            None => MessageResult::new(ErrorInfo::no_capability_no_fallback().to_value()),
        }
    }

    fn deliver_complete(&self, result: MessageResult) {
        let _ = self.inner.completions.send(result.clone());
        if let Some(callback) = self.inner.on_complete.lock().as_mut() {
            callback(result);
            return;
        }
        if let Some(callback) = self.inner.shared.on_complete() {
            callback(result);
            return;
        }
        tracing::trace!(unit = %self.inner.id, "completion with no listener");
    }

    fn deliver_failure(&self, error: ErrorInfo) {
        if let Some(callback) = self.inner.on_failure.lock().as_mut() {
            callback(error);
            return;
        }
        if let Some(callback) = self.inner.shared.on_failure() {
            callback(error);
            return;
        }
        tracing::error!(
            unit = %self.inner.id,
            code = %error.code,
            "unit failure with no listener: {}",
            error.message
        );
    }

    /// Tear down the current primitive and build a fresh one from the
    /// mutated scope source. Listener wiring is re-established per
    /// dispatch, so nothing carries over from the old instance.
    fn rebuild(&self) -> Result<(), PoolError> {
        if !self.inner.supports_isolated_execution {
            return Ok(());
        }
        if *self.inner.state.lock() == UnitState::Dispatched {
            tracing::warn!(
                unit = %self.inner.id,
                "rebuilding with a dispatch in flight; that round trip is abandoned"
            );
        }

        let program = self.inner.scope.lock().assemble();
        let fresh = self.inner.backend.spawn(&program)?;
        if let Some(mut old) = self.inner.handle.lock().replace(fresh) {
            old.stop();
        }
        *self.inner.state.lock() = UnitState::Ready;
        tracing::debug!(unit = %self.inner.id, "rebuilt primitive after scope mutation");
        Ok(())
    }
}

impl PartialEq for ExecutionUnit {
    fn eq(&self, other: &Self) -> bool {
        self.same_unit(other)
    }
}

impl Eq for ExecutionUnit {}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("isolated", &self.inner.supports_isolated_execution)
            .finish()
    }
}
