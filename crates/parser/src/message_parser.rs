use std::sync::Arc;

use {
    boltline_protocol::{
        ACTION_TAG, ARTIFACT_TAG, ActionEvent, ArtifactRef, BoltAction, ParserEvent, action_types,
        attributes as attr,
    },
    tracing::{debug, warn},
};

use crate::{
    context::{MessageState, ParseContext, PendingAction},
    element::{ArtifactElementFactory, default_artifact_element},
    scanner::{
        Attributes, CloseTagMatch, CloseTagSearch, OpenTagMatch, find_close_tag, match_close_tag,
        match_open_tag,
    },
};

/// Result of one [`StreamingMessageParser::parse`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    /// Display text produced by this call. Concatenating the deltas of all
    /// calls for a message yields its full display text.
    pub display: String,
    /// Elements that opened or closed during this call, in buffer order.
    pub events: Vec<ParserEvent>,
}

enum Step {
    /// Keep scanning from this offset.
    Advance(usize),
    /// Stop until more input arrives; resume from this offset.
    Wait(usize),
}

/// Streaming parser for the artifact/action protocol.
///
/// The parser itself only holds configuration; all per-message state lives in
/// the [`ParseContext`] passed to [`parse`](Self::parse).
pub struct StreamingMessageParser {
    artifact_element: ArtifactElementFactory,
}

impl Default for StreamingMessageParser {
    fn default() -> Self {
        Self::with_artifact_element(Arc::new(default_artifact_element))
    }
}

impl StreamingMessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact_element(artifact_element: ArtifactElementFactory) -> Self {
        Self { artifact_element }
    }

    /// Parse the full current text of a message.
    ///
    /// `input` must extend the text passed in the previous call for the same
    /// message id. Only the unconsumed tail is scanned; incomplete markup at
    /// the end is held back until a later call disambiguates it.
    pub fn parse(&self, ctx: &mut ParseContext, message_id: &str, input: &str) -> ParseOutput {
        let state = ctx.state_mut(message_id);
        let mut output = ParseOutput::default();

        if state.position > input.len() || !input.is_char_boundary(state.position) {
            warn!(
                message_id,
                position = state.position,
                len = input.len(),
                "message text is not an extension of the previous update"
            );
            return output;
        }

        let mut i = state.position;
        while i < input.len() {
            let step = if state.inside_action() {
                self.scan_action_body(state, input, i, &mut output)
            } else if state.inside_artifact() {
                self.scan_artifact_body(state, input, i, &mut output)
            } else {
                self.scan_text(state, message_id, input, i, &mut output)
            };

            match step {
                Step::Advance(next) => i = next,
                Step::Wait(at) => {
                    i = at;
                    break;
                },
            }
        }

        state.position = i;
        output
    }

    fn scan_text(
        &self,
        state: &mut MessageState,
        message_id: &str,
        input: &str,
        i: usize,
        output: &mut ParseOutput,
    ) -> Step {
        let rest = &input[i..];
        let Some(lt) = rest.find('<') else {
            output.display.push_str(rest);
            return Step::Advance(input.len());
        };
        if lt > 0 {
            output.display.push_str(&rest[..lt]);
            return Step::Advance(i + lt);
        }

        // Closing tags never start an artifact.
        if input.as_bytes().get(i + 1) == Some(&b'/') {
            output.display.push('<');
            return Step::Advance(i + 1);
        }

        match match_open_tag(input, i, ARTIFACT_TAG) {
            OpenTagMatch::Text { end } => {
                output.display.push_str(&input[i..end]);
                Step::Advance(end)
            },
            OpenTagMatch::Partial => Step::Wait(i),
            OpenTagMatch::Open(tag) => {
                self.open_artifact(state, message_id, tag.attributes, output);
                if tag.self_closing {
                    close_artifact(state, output);
                }
                Step::Advance(tag.end)
            },
        }
    }

    fn scan_artifact_body(
        &self,
        state: &mut MessageState,
        input: &str,
        i: usize,
        output: &mut ParseOutput,
    ) -> Step {
        // Text between actions is never displayed.
        let Some(lt) = input[i..].find('<') else {
            return Step::Advance(input.len());
        };
        let at = i + lt;

        let action = match_open_tag(input, at, ACTION_TAG);
        if let OpenTagMatch::Open(tag) = action {
            open_action(state, tag.attributes, tag.end, output);
            if tag.self_closing {
                close_action(state, "", output);
            }
            return Step::Advance(tag.end);
        }

        match match_close_tag(input, at, ARTIFACT_TAG) {
            CloseTagMatch::Close { end } => {
                close_artifact(state, output);
                Step::Advance(end)
            },
            CloseTagMatch::Partial => Step::Wait(at),
            CloseTagMatch::NoMatch if matches!(action, OpenTagMatch::Partial) => Step::Wait(at),
            CloseTagMatch::NoMatch => Step::Advance(at + 1),
        }
    }

    fn scan_action_body(
        &self,
        state: &mut MessageState,
        input: &str,
        i: usize,
        output: &mut ParseOutput,
    ) -> Step {
        let Some(body_start) = state.current_action.as_ref().map(|a| a.body_start) else {
            return Step::Wait(i);
        };

        match find_close_tag(input, i, ACTION_TAG) {
            CloseTagSearch::Found { start, end } => {
                close_action(state, &input[body_start..start], output);
                Step::Advance(end)
            },
            CloseTagSearch::Missing { resume } => Step::Wait(resume),
        }
    }

    fn open_artifact(
        &self,
        state: &mut MessageState,
        message_id: &str,
        mut attributes: Attributes,
        output: &mut ParseOutput,
    ) {
        let id = attributes.remove(attr::ID);
        let title = attributes.remove(attr::TITLE);
        if title.is_none() {
            warn!(message_id, "artifact title missing");
        }
        if id.is_none() {
            warn!(message_id, "artifact id missing");
        }

        let artifact = ArtifactRef {
            id,
            message_id: message_id.to_string(),
            title,
            attributes,
        };
        output.display.push_str(&(self.artifact_element)(&artifact));
        output
            .events
            .push(ParserEvent::ArtifactOpen(artifact.clone()));
        state.current_artifact = Some(artifact);
    }
}

fn close_artifact(state: &mut MessageState, output: &mut ParseOutput) {
    if let Some(artifact) = state.current_artifact.take() {
        output.events.push(ParserEvent::ArtifactClose(artifact));
    }
}

fn open_action(
    state: &mut MessageState,
    mut attributes: Attributes,
    body_start: usize,
    output: &mut ParseOutput,
) {
    let Some((artifact_id, message_id)) = state
        .current_artifact
        .as_ref()
        .map(|a| (a.id.clone(), a.message_id.clone()))
    else {
        return;
    };

    let action_type = attributes.remove(attr::TYPE);
    let action = match action_type.as_deref() {
        Some(action_types::SHELL) => BoltAction::Shell {
            content: String::new(),
        },
        Some(action_types::FILE) => {
            let file_path = attributes.remove(attr::FILE_PATH).unwrap_or_else(|| {
                debug!(message_id = %message_id, "file path not specified");
                String::new()
            });
            BoltAction::File {
                file_path,
                content: String::new(),
            }
        },
        other => {
            warn!(message_id = %message_id, action_type = ?other, "unknown action type");
            BoltAction::Unknown {
                action_type: action_type.clone(),
                content: String::new(),
            }
        },
    };

    let action_id = state.allocate_action_id();
    output.events.push(ParserEvent::ActionOpen(ActionEvent {
        artifact_id,
        message_id,
        action_id,
        action: action.clone(),
        attributes: attributes.clone(),
    }));
    state.current_action = Some(PendingAction {
        action_id,
        action,
        attributes,
        body_start,
    });
}

fn close_action(state: &mut MessageState, body: &str, output: &mut ParseOutput) {
    let Some(pending) = state.current_action.take() else {
        return;
    };
    let (artifact_id, message_id) = state
        .current_artifact
        .as_ref()
        .map(|a| (a.id.clone(), a.message_id.clone()))
        .unwrap_or_default();

    output.events.push(ParserEvent::ActionClose(ActionEvent {
        artifact_id,
        message_id,
        action_id: pending.action_id,
        action: pending.action.with_body(body),
        attributes: pending.attributes,
    }));
}
