// Native backend: registered closures running on dedicated tokio tasks

use super::{IsolateBackend, IsolateHandle};
use crate::error::{PoolError, UnitError};
use crate::message::Message;
use crate::source::MAIN_BINDING;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Program entry point: receives the message envelope and the unit's scope.
pub type ProgramFn = Arc<dyn Fn(Message, &Scope) -> Result<Value, UnitError> + Send + Sync>;

/// Injected helper callable from a program through its scope.
pub type HelperFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

enum Registered {
    Program(ProgramFn),
    Helper(HelperFn),
}

/// Helpers visible to a running program, resolved by name at call time.
///
/// The set of names mirrors the unit's injected scope at the moment the
/// instance was built; a rebuild after `load_scripts`/`remove_scripts`
/// produces a fresh scope.
#[derive(Default)]
pub struct Scope {
    helpers: HashMap<String, HelperFn>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    /// Call a helper by name, failing if it is not in scope.
    pub fn call(&self, name: &str, arg: Value) -> Result<Value, UnitError> {
        match self.helpers.get(name) {
            Some(helper) => Ok(helper(arg)),
            None => Err(UnitError::UnknownHelper(name.to_string())),
        }
    }
}

/// Serialization collaborator for the native backend.
///
/// Turns native closures into opaque fragment tokens (`@fn:<n>`) that the
/// scope-source machinery treats as program text, and resolves the tokens
/// back to closures at spawn time. Cheap to clone; clones share the
/// registry.
#[derive(Default, Clone)]
pub struct FnRegistry {
    inner: Arc<Mutex<HashMap<String, Registered>>>,
    next: Arc<AtomicU64>,
}

impl FnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a main program body into its fragment token.
    pub fn serialize_program<F>(&self, program: F) -> String
    where
        F: Fn(Message, &Scope) -> Result<Value, UnitError> + Send + Sync + 'static,
    {
        let token = self.mint();
        self.inner
            .lock()
            .insert(token.clone(), Registered::Program(Arc::new(program)));
        token
    }

    /// Serialize a helper into its fragment token.
    pub fn serialize_helper<F>(&self, helper: F) -> String
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let token = self.mint();
        self.inner
            .lock()
            .insert(token.clone(), Registered::Helper(Arc::new(helper)));
        token
    }

    fn mint(&self) -> String {
        format!("@fn:{}", self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn resolve_program(&self, token: &str) -> Option<ProgramFn> {
        match self.inner.lock().get(token) {
            Some(Registered::Program(f)) => Some(Arc::clone(f)),
            _ => None,
        }
    }

    fn resolve_helper(&self, token: &str) -> Option<HelperFn> {
        match self.inner.lock().get(token) {
            Some(Registered::Helper(f)) => Some(Arc::clone(f)),
            _ => None,
        }
    }
}

struct ParsedProgram {
    main: ProgramFn,
    scope: Scope,
}

/// Backend that runs registered native closures on dedicated spawned
/// tasks, one per live instance.
///
/// Must be used from within a tokio runtime: `spawn` starts the request
/// loop with `tokio::spawn`.
pub struct NativeBackend {
    registry: FnRegistry,
    channel_capacity: usize,
}

impl NativeBackend {
    pub fn new(registry: FnRegistry) -> Self {
        Self {
            registry,
            channel_capacity: 32,
        }
    }

    /// Override the per-instance dispatch queue depth.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn registry(&self) -> &FnRegistry {
        &self.registry
    }

    fn parse(&self, program: &str) -> Result<ParsedProgram, PoolError> {
        let mut main = None;
        let mut scope = Scope::default();

        for statement in program.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }

            let (lhs, rhs) = statement
                .split_once('=')
                .ok_or_else(|| PoolError::Spawn(format!("malformed fragment '{statement}'")))?;
            let lhs = lhs.trim();
            let token = rhs.trim();

            if lhs == MAIN_BINDING.trim_end_matches(" = ") {
                let program_fn = self.registry.resolve_program(token).ok_or_else(|| {
                    PoolError::Spawn(format!("unknown program token '{token}'"))
                })?;
                main = Some(program_fn);
            } else if let Some(name) = lhs.strip_prefix("self.") {
                let helper = self.registry.resolve_helper(token).ok_or_else(|| {
                    PoolError::Spawn(format!("unknown helper token '{token}' for '{name}'"))
                })?;
                scope.helpers.insert(name.to_string(), helper);
            } else {
                return Err(PoolError::Spawn(format!("unexpected binding '{lhs}'")));
            }
        }

        let main =
            main.ok_or_else(|| PoolError::Spawn("program has no onmessage binding".to_string()))?;
        Ok(ParsedProgram { main, scope })
    }
}

impl IsolateBackend for NativeBackend {
    fn supports_isolation(&self) -> bool {
        true
    }

    fn spawn(&self, program: &str) -> Result<Box<dyn IsolateHandle>, PoolError> {
        let ParsedProgram { main, scope } = self.parse(program)?;
        let (tx, mut rx) = mpsc::channel::<Request>(self.channel_capacity);

        let task = tokio::spawn(async move {
            while let Some((data, reply)) = rx.recv().await {
                let result = main(Message::new(data), &scope);
                // Receiver may have been dropped (abandoned round trip).
                let _ = reply.send(result);
            }
        });

        Ok(Box::new(NativeHandle {
            tx: Some(tx),
            task: Some(task),
        }))
    }
}

type Request = (Value, oneshot::Sender<Result<Value, UnitError>>);

/// Live instance: a spawned task draining a request channel.
struct NativeHandle {
    tx: Option<mpsc::Sender<Request>>,
    task: Option<JoinHandle<()>>,
}

impl IsolateHandle for NativeHandle {
    fn send(&mut self, data: Value) -> oneshot::Receiver<Result<Value, UnitError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match &self.tx {
            Some(tx) => {
                if let Err(err) = tx.try_send((data, reply_tx)) {
                    let (unit_err, request) = match err {
                        mpsc::error::TrySendError::Full(request) => {
                            (UnitError::QueueFull, request)
                        }
                        mpsc::error::TrySendError::Closed(request) => {
                            (UnitError::WorkerShutdown, request)
                        }
                    };
                    let (_, reply_tx) = request;
                    let _ = reply_tx.send(Err(unit_err));
                }
            }
            None => {
                let _ = reply_tx.send(Err(UnitError::WorkerShutdown));
            }
        }
        reply_rx
    }

    fn stop(&mut self) {
        // Dropping the sender ends the request loop; abort covers a task
        // stuck inside a long-running program body.
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_mints_distinct_tokens() {
        let registry = FnRegistry::new();
        let a = registry.serialize_program(|msg, _| Ok(msg.data));
        let b = registry.serialize_helper(|value| value);
        assert_ne!(a, b);
        assert!(a.starts_with("@fn:"));
    }

    #[test]
    fn parse_rejects_unknown_tokens() {
        let backend = NativeBackend::new(FnRegistry::new());
        let result = backend.parse("self.onmessage = @fn:99;");
        assert!(matches!(result, Err(PoolError::Spawn(_))));
    }

    #[test]
    fn parse_requires_a_main_binding() {
        let registry = FnRegistry::new();
        let helper = registry.serialize_helper(|value| value);
        let backend = NativeBackend::new(registry);

        let result = backend.parse(&format!("self.inc = {helper};"));
        assert!(matches!(result, Err(PoolError::Spawn(msg)) if msg.contains("onmessage")));
    }

    #[test]
    fn parse_rejects_program_token_in_helper_slot() {
        let registry = FnRegistry::new();
        let main = registry.serialize_program(|msg, _| Ok(msg.data));
        let backend = NativeBackend::new(registry.clone());

        let program = registry.serialize_program(|msg, _| Ok(msg.data));
        let result = backend.parse(&format!("self.helper = {program};self.onmessage = {main};"));
        assert!(matches!(result, Err(PoolError::Spawn(_))));
    }

    #[tokio::test]
    async fn spawned_program_replies() {
        let registry = FnRegistry::new();
        let token = registry.serialize_program(|msg, _| Ok(msg.data));
        let backend = NativeBackend::new(registry);

        let mut handle = backend.spawn(&format!("self.onmessage = {token};")).unwrap();
        let reply = handle.send(json!(7)).await.unwrap();
        assert_eq!(reply.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn program_reaches_helpers_through_scope() {
        let registry = FnRegistry::new();
        let inc = registry.serialize_helper(|value| json!(value.as_i64().unwrap_or(0) + 1));
        let main = registry.serialize_program(|msg, scope| scope.call("inc", msg.data));
        let backend = NativeBackend::new(registry);

        let mut handle = backend
            .spawn(&format!("self.inc = {inc};self.onmessage = {main};"))
            .unwrap();
        let reply = handle.send(json!(41)).await.unwrap();
        assert_eq!(reply.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_the_loop() {
        let registry = FnRegistry::new();
        let token = registry.serialize_program(|msg, _| Ok(msg.data));
        let backend = NativeBackend::new(registry);

        let mut handle = backend.spawn(&format!("self.onmessage = {token};")).unwrap();
        handle.stop();
        handle.stop();

        let reply = handle.send(json!(1)).await.unwrap();
        assert!(matches!(reply, Err(UnitError::WorkerShutdown)));
    }
}
