// Shared-behavior object consulted by every unit of a pool

use crate::error::{ErrorInfo, PoolError};
use crate::message::MessageResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared default completion handler.
pub type SharedCompleteFn = Arc<dyn Fn(MessageResult) + Send + Sync>;

/// Shared default failure handler.
pub type SharedFailureFn = Arc<dyn Fn(ErrorInfo) + Send + Sync>;

/// Field names that belong to the dispatch and termination mechanics.
/// `extend` refuses to shadow these.
pub const RESERVED_FIELDS: &[&str] = &[
    "postMessage",
    "run",
    "terminate",
    "loadScripts",
    "removeScripts",
];

/// Inheritable defaults shared by all units created from one pool.
///
/// Shared by reference, not copied at creation time: a merge through
/// `extend` is visible immediately to units created both before and
/// after the call. Units consult it second, after their own fields and
/// callback slots.
#[derive(Default)]
pub struct SharedBehavior {
    fields: RwLock<HashMap<String, Value>>,
    on_complete: RwLock<Option<SharedCompleteFn>>,
    on_failure: RwLock<Option<SharedFailureFn>>,
}

impl SharedBehavior {
    /// Shallow, last-write-wins merge. Rejects reserved mechanic names
    /// before applying anything, so a bad batch leaves the fields
    /// untouched.
    pub fn extend<I>(&self, partial: I) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut staged = Vec::new();
        for (key, value) in partial {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(PoolError::ReservedField(key));
            }
            staged.push((key, value));
        }

        let mut fields = self.fields.write();
        for (key, value) in staged {
            fields.insert(key, value);
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_on_complete(&self, handler: SharedCompleteFn) {
        *self.on_complete.write() = Some(handler);
    }

    pub fn set_on_failure(&self, handler: SharedFailureFn) {
        *self.on_failure.write() = Some(handler);
    }

    pub(crate) fn on_complete(&self) -> Option<SharedCompleteFn> {
        self.on_complete.read().clone()
    }

    pub(crate) fn on_failure(&self) -> Option<SharedFailureFn> {
        self.on_failure.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extend_merges_last_write_wins() {
        let shared = SharedBehavior::default();
        shared
            .extend(vec![("x".to_string(), json!(1)), ("y".to_string(), json!("a"))])
            .unwrap();
        shared.extend(vec![("x".to_string(), json!(2))]).unwrap();

        assert_eq!(shared.field("x"), Some(json!(2)));
        assert_eq!(shared.field("y"), Some(json!("a")));
        assert_eq!(shared.field("z"), None);
    }

    #[test]
    fn extend_rejects_reserved_names() {
        let shared = SharedBehavior::default();
        let result = shared.extend(vec![
            ("x".to_string(), json!(1)),
            ("terminate".to_string(), json!("nope")),
        ]);

        assert!(matches!(result, Err(PoolError::ReservedField(name)) if name == "terminate"));
        // The whole batch is refused, including the valid key.
        assert_eq!(shared.field("x"), None);
    }

    #[test]
    fn default_handlers_are_unset() {
        let shared = SharedBehavior::default();
        assert!(shared.on_complete().is_none());
        assert!(shared.on_failure().is_none());

        shared.set_on_complete(Arc::new(|_| {}));
        assert!(shared.on_complete().is_some());
    }
}
