use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conclave_core::ids::SpanId;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// One timed step of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Span {
    pub id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<SpanId>,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub attributes: Map<String, Value>,
}

impl Span {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_milliseconds())
    }
}

/// A span with its children, for export.
#[derive(Clone, Debug, Serialize)]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: Span,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SpanNode>,
}

#[derive(Default)]
struct TraceState {
    spans: Vec<Span>,
    index: HashMap<SpanId, usize>,
}

/// Hierarchical span recorder for one run.
///
/// Spans are stored flat in open order and assembled into a tree on export.
#[derive(Default)]
pub struct Trace {
    state: Mutex<TraceState>,
}

impl Trace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a span under `parent`. It closes when the returned guard drops.
    pub fn open(
        self: &Arc<Self>,
        name: impl Into<String>,
        parent: Option<&SpanId>,
        attributes: &[(&str, Value)],
    ) -> ActiveSpan {
        let id = SpanId::new();
        let span = Span {
            id: id.clone(),
            parent: parent.cloned(),
            name: name.into(),
            start: Utc::now(),
            end: None,
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        };
        let mut state = self.state.lock();
        let idx = state.spans.len();
        state.index.insert(id.clone(), idx);
        state.spans.push(span);
        drop(state);
        ActiveSpan {
            trace: Arc::clone(self),
            id,
        }
    }

    fn close(&self, id: &SpanId) {
        let mut state = self.state.lock();
        let idx = state.index.get(id).copied();
        if let Some(idx) = idx {
            let span = &mut state.spans[idx];
            if span.end.is_none() {
                span.end = Some(Utc::now());
            }
        }
    }

    fn set_attribute(&self, id: &SpanId, key: &str, value: Value) {
        let mut state = self.state.lock();
        let idx = state.index.get(id).copied();
        if let Some(idx) = idx {
            state.spans[idx].attributes.insert(key.to_string(), value);
        }
    }

    /// Flat copy of all spans in open order.
    pub fn spans(&self) -> Vec<Span> {
        self.state.lock().spans.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spans named `name`, in open order.
    pub fn find(&self, name: &str) -> Vec<Span> {
        self.state
            .lock()
            .spans
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Root spans with their descendants.
    pub fn tree(&self) -> Vec<SpanNode> {
        let spans = self.spans();
        let mut children: HashMap<Option<SpanId>, Vec<Span>> = HashMap::new();
        for span in spans {
            children.entry(span.parent.clone()).or_default().push(span);
        }
        build_nodes(None, &mut children)
    }

    pub fn export(&self) -> Value {
        json!({ "spans": self.tree() })
    }
}

fn build_nodes(
    parent: Option<SpanId>,
    children: &mut HashMap<Option<SpanId>, Vec<Span>>,
) -> Vec<SpanNode> {
    let Some(spans) = children.remove(&parent) else {
        return Vec::new();
    };
    spans
        .into_iter()
        .map(|span| {
            let nested = build_nodes(Some(span.id.clone()), children);
            SpanNode {
                span,
                children: nested,
            }
        })
        .collect()
}

/// Open span handle. Closes the span on drop.
pub struct ActiveSpan {
    trace: Arc<Trace>,
    id: SpanId,
}

impl ActiveSpan {
    pub fn id(&self) -> &SpanId {
        &self.id
    }

    pub fn child(&self, name: impl Into<String>, attributes: &[(&str, Value)]) -> ActiveSpan {
        self.trace.open(name, Some(&self.id), attributes)
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.trace.set_attribute(&self.id, key, value);
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.trace.close(&self.id);
    }
}

impl std::fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActiveSpan").field(&self.id).finish()
    }
}
