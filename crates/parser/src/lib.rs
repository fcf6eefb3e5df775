//! Incremental parser for the artifact/action protocol embedded in streamed
//! model responses.
//!
//! The host re-delivers the whole message on every update; the parser keeps a
//! cursor per message in a [`ParseContext`] and only looks at the unconsumed
//! tail. Output is the display text with protocol markup removed plus the
//! element events discovered by that call.

pub mod context;
pub mod element;
pub mod message_parser;
pub mod scanner;

pub use {
    context::ParseContext,
    element::{ArtifactElementFactory, default_artifact_element, empty_artifact_element},
    message_parser::{ParseOutput, StreamingMessageParser},
};
