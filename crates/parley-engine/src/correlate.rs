use parley_core::messages::{ToolCall, ToolResponse};

/// Pairs tool responses with the calls of one round.
///
/// A response matches the unmatched call with the same id first; failing
/// that, the oldest unmatched call with the same name.
#[derive(Debug, Default)]
pub struct CallLedger {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    call: ToolCall,
    matched: bool,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_calls(calls: impl IntoIterator<Item = ToolCall>) -> Self {
        let mut ledger = Self::new();
        for call in calls {
            ledger.push(call);
        }
        ledger
    }

    /// Track a call; returns its position.
    pub fn push(&mut self, call: ToolCall) -> usize {
        self.entries.push(Entry {
            call,
            matched: false,
        });
        self.entries.len() - 1
    }

    /// Match `response` to a call, marking it. `None` if nothing is left to match.
    pub fn match_response(&mut self, response: &ToolResponse) -> Option<usize> {
        let by_id = response.id.as_ref().and_then(|id| {
            self.entries
                .iter()
                .position(|e| !e.matched && e.call.id.as_ref() == Some(id))
        });
        let idx = by_id.or_else(|| {
            self.entries
                .iter()
                .position(|e| !e.matched && e.call.name == response.name)
        })?;
        self.entries[idx].matched = true;
        Some(idx)
    }

    pub fn call(&self, idx: usize) -> Option<&ToolCall> {
        self.entries.get(idx).map(|e| &e.call)
    }

    pub fn unmatched(&self) -> usize {
        self.entries.iter().filter(|e| !e.matched).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unmatched() == 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::ToolCallId;
    use serde_json::json;

    fn response(id: Option<&str>, name: &str) -> ToolResponse {
        ToolResponse {
            id: id.map(ToolCallId::from_raw),
            name: name.into(),
            response: json!({}),
        }
    }

    #[test]
    fn out_of_order_responses_match_by_id() {
        let mut ledger = CallLedger::from_calls([
            ToolCall::new("command_status", json!({"CommandId": "a"})).with_id("c1"),
            ToolCall::new("command_status", json!({"CommandId": "b"})).with_id("c2"),
            ToolCall::new("command_status", json!({"CommandId": "c"})).with_id("c3"),
        ]);

        assert_eq!(ledger.match_response(&response(Some("c3"), "command_status")), Some(2));
        assert_eq!(ledger.match_response(&response(Some("c1"), "command_status")), Some(0));
        assert_eq!(ledger.match_response(&response(Some("c2"), "command_status")), Some(1));
        assert!(ledger.is_complete());
        // a repeated response finds nothing left
        assert_eq!(ledger.match_response(&response(Some("c2"), "command_status")), None);
    }

    #[test]
    fn missing_ids_fall_back_to_oldest_same_name() {
        let mut ledger = CallLedger::from_calls([
            ToolCall::new("list_directory", json!({"DirectoryPath": "/a"})),
            ToolCall::new("run_command", json!({"CommandLine": "ls"})),
            ToolCall::new("list_directory", json!({"DirectoryPath": "/b"})),
        ]);

        assert_eq!(ledger.match_response(&response(None, "list_directory")), Some(0));
        assert_eq!(ledger.match_response(&response(None, "list_directory")), Some(2));
        assert_eq!(ledger.match_response(&response(None, "list_directory")), None);
        assert_eq!(ledger.unmatched(), 1);
    }

    #[test]
    fn id_match_takes_precedence_over_name_order() {
        let mut ledger = CallLedger::from_calls([
            ToolCall::new("t", json!({"n": 1})),
            ToolCall::new("t", json!({"n": 2})).with_id("x"),
        ]);
        assert_eq!(ledger.match_response(&response(Some("x"), "t")), Some(1));
        assert_eq!(ledger.match_response(&response(None, "t")), Some(0));
    }

    #[test]
    fn unknown_id_falls_back_to_name() {
        let mut ledger = CallLedger::from_calls([ToolCall::new("t", json!({}))]);
        assert_eq!(ledger.match_response(&response(Some("nope"), "t")), Some(0));
        assert_eq!(ledger.call(0).unwrap().name, "t");
        assert_eq!(ledger.len(), 1);
    }
}
