// Message envelopes exchanged with execution units

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input envelope handed to a running program, and to fallback closures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub data: Value,
}

impl Message {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

/// Completion envelope delivered to `on_complete` slots and `run_all` results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    pub data: Value,
}

impl MessageResult {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelopes_round_trip_through_json() {
        let msg = Message::new(json!([1, 2, 3]));
        let back: Message = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back.data, json!([1, 2, 3]));

        let res = MessageResult::new(json!({"total": 55}));
        assert_eq!(res.data["total"], 55);
    }
}
