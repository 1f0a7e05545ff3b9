use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::Attachment;
use crate::errors::ProtocolError;
use crate::ids::CallId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Forward,
    Return,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Return => "return",
        }
    }
}

/// Cross-agent correlation record. A `forward` opens a delegation, the
/// matching `return` carries the same `call_id` back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn forward(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Forward,
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            call_id: CallId::new(),
            attachments: Vec::new(),
        }
    }

    /// Build the `return` answering `forward`: roles swap, `call_id` is kept.
    pub fn reply_to(forward: &Message, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Return,
            sender: forward.receiver.clone(),
            receiver: forward.sender.clone(),
            content: content.into(),
            call_id: forward.call_id.clone(),
            attachments: Vec::new(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<CallId>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn is_forward(&self) -> bool {
        self.kind == MessageKind::Forward
    }
}

#[derive(Default)]
struct LedgerState {
    open: HashMap<CallId, usize>,
    history: Vec<Message>,
}

/// Records every forward/return of one run and rejects a return whose
/// `call_id` was never forwarded (or was already answered).
///
/// Shared by all invocations of a run, sibling delegations included.
#[derive(Default)]
pub struct CallLedger {
    state: Mutex<LedgerState>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, forward: &Message) -> Result<(), ProtocolError> {
        if forward.kind != MessageKind::Forward {
            return Err(ProtocolError::WrongKind {
                call_id: forward.call_id.clone(),
                expected: MessageKind::Forward.as_str(),
                found: forward.kind.as_str(),
            });
        }
        let mut state = self.state.lock();
        if state.open.contains_key(&forward.call_id)
            || state.history.iter().any(|m| m.call_id == forward.call_id)
        {
            return Err(ProtocolError::DuplicateForward {
                call_id: forward.call_id.clone(),
            });
        }
        let idx = state.history.len();
        state.open.insert(forward.call_id.clone(), idx);
        state.history.push(forward.clone());
        Ok(())
    }

    /// Close the forward matching `ret`. Returns the original forward.
    pub fn complete(&self, ret: &Message) -> Result<Message, ProtocolError> {
        if ret.kind != MessageKind::Return {
            return Err(ProtocolError::WrongKind {
                call_id: ret.call_id.clone(),
                expected: MessageKind::Return.as_str(),
                found: ret.kind.as_str(),
            });
        }
        let mut state = self.state.lock();
        let idx = state
            .open
            .remove(&ret.call_id)
            .ok_or_else(|| ProtocolError::UnmatchedReturn {
                call_id: ret.call_id.clone(),
            })?;
        let forward = state.history[idx].clone();
        state.history.push(ret.clone());
        Ok(forward)
    }

    /// Forwards still awaiting their return.
    pub fn outstanding(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Every message recorded so far, in issue order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().history.clone()
    }
}
