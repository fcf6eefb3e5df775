//! Ordered execution of parsed actions.
//!
//! Each artifact gets an [`ActionQueue`]: a single worker task that runs the
//! artifact's actions one at a time in discovery order through an
//! [`ActionRunner`]. The [`Workbench`] maps parser events onto queues and the
//! [`Session`] ties a parser context to a workbench.

pub mod queue;
pub mod runner;
pub mod session;
pub mod state;
pub mod workbench;

pub use {
    queue::ActionQueue,
    runner::{ActionOutputSink, ActionRunner, TracingOutputSink},
    session::Session,
    state::{ActionState, ActionStatus, ActionUpdate},
    workbench::{ArtifactEntry, Workbench},
};
