use serde::{Deserialize, Serialize};

/// One attribute of an [`Event`], preserved verbatim from the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// An event emitted by a transaction (or by begin/end-block processing), with its module
/// derived from the event type's dot-prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tx_hash: String,
    pub block_height: i64,
    /// Position of this event within its transaction; together with `tx_hash` forms the
    /// natural key used for idempotent replay.
    pub event_index: i32,
    pub event_type: String,
    pub module: String,
    pub attributes: Vec<EventAttribute>,
}

/// Derive the module prefix of an event type: the substring up to (not including) the first
/// dot, or `"unknown"` if the event type carries no dot. This is the reference contract; a
/// richer per-module classifier may be layered on top without changing this fallback.
pub fn module_of_event_type(event_type: &str) -> String {
    match event_type.split_once('.') {
        Some((module, _)) if !module.is_empty() => module.to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_prefix_is_module() {
        assert_eq!(module_of_event_type("dex.swap"), "dex");
        assert_eq!(module_of_event_type("oracle.price_update"), "oracle");
    }

    #[test]
    fn no_dot_is_unknown() {
        assert_eq!(module_of_event_type("transfer"), "unknown");
        assert_eq!(module_of_event_type(""), "unknown");
    }

    #[test]
    fn leading_dot_is_unknown() {
        assert_eq!(module_of_event_type(".swap"), "unknown");
    }
}
