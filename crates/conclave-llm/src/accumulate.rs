use std::collections::BTreeMap;

use conclave_core::context::ToolCall;
use conclave_core::ids::ToolCallId;

use crate::arguments::parse_tool_arguments;

#[derive(Default)]
struct Partial {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments keyed by the vendor's call index.
///
/// Vendors send the id and name once and the arguments in pieces; fragments
/// for different indices may interleave.
#[derive(Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, Partial>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let entry = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            entry.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            entry.name = name.to_string();
        }
        if let Some(fragment) = arguments {
            entry.arguments.push_str(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Parse every call in index order. A call that never received an id gets
    /// a generated one; arguments that were not clean JSON leave a diagnostic
    /// on the call.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|partial| {
                let id = if partial.id.is_empty() {
                    ToolCallId::new()
                } else {
                    ToolCallId::from_raw(partial.id)
                };
                parse_tool_arguments(&partial.arguments).into_call(id, partial.name)
            })
            .collect()
    }
}
