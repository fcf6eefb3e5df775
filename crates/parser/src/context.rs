//! Per-session parser state.

use std::collections::HashMap;

use boltline_protocol::{ActionId, ArtifactRef, BoltAction, ExtraAttributes};

/// An action whose open tag has been seen but whose closing tag has not.
#[derive(Debug, Clone)]
pub(crate) struct PendingAction {
    pub action_id: ActionId,
    pub action: BoltAction,
    pub attributes: ExtraAttributes,
    /// Byte offset of the first body byte.
    pub body_start: usize,
}

/// Scanning state for one message.
#[derive(Debug, Default)]
pub(crate) struct MessageState {
    /// Everything before this offset has been consumed.
    pub position: usize,
    pub current_artifact: Option<ArtifactRef>,
    pub current_action: Option<PendingAction>,
    pub next_action_id: u32,
}

impl MessageState {
    pub fn inside_artifact(&self) -> bool {
        self.current_artifact.is_some()
    }

    pub fn inside_action(&self) -> bool {
        self.current_action.is_some()
    }

    pub fn allocate_action_id(&mut self) -> ActionId {
        let id = ActionId(self.next_action_id);
        self.next_action_id += 1;
        id
    }
}

/// Parser state for every message of one conversation.
///
/// Owned by the session; a message's state is created on its first parse and
/// lives until [`ParseContext::dispose_message`] or until the context is
/// dropped.
#[derive(Debug, Default)]
pub struct ParseContext {
    messages: HashMap<String, MessageState>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state_mut(&mut self, message_id: &str) -> &mut MessageState {
        self.messages.entry(message_id.to_string()).or_default()
    }

    /// Consumed byte count for a message, if it has been parsed.
    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.get(message_id).map(|s| s.position)
    }

    /// Whether the message's cursor currently sits inside an artifact.
    pub fn is_inside_artifact(&self, message_id: &str) -> bool {
        self.messages
            .get(message_id)
            .is_some_and(MessageState::inside_artifact)
    }

    /// Whether the message's cursor currently sits inside an action body.
    pub fn is_inside_action(&self, message_id: &str) -> bool {
        self.messages
            .get(message_id)
            .is_some_and(MessageState::inside_action)
    }

    /// Forget a message. Parsing it again starts from scratch.
    pub fn dispose_message(&mut self, message_id: &str) -> bool {
        self.messages.remove(message_id).is_some()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
