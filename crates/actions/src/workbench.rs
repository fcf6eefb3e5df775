use std::{collections::HashMap, sync::Arc};

use {
    boltline_protocol::{ActionEvent, ArtifactRef, ParserEvent},
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

use crate::{queue::ActionQueue, runner::ActionRunner, state::ActionUpdate};

const UPDATE_CAPACITY: usize = 256;

/// An artifact known to the workbench together with its action lane.
pub struct ArtifactEntry {
    artifact: ArtifactRef,
    closed: bool,
    queue: ActionQueue,
}

impl ArtifactEntry {
    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    /// Whether the closing tag has been seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }
}

/// Artifacts of a conversation, keyed by message id in discovery order.
pub struct Workbench {
    runner: Arc<ActionRunner>,
    order: Vec<String>,
    artifacts: HashMap<String, ArtifactEntry>,
    updates: broadcast::Sender<ActionUpdate>,
}

impl Workbench {
    pub fn new(runner: Arc<ActionRunner>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            runner,
            order: Vec::new(),
            artifacts: HashMap::new(),
            updates,
        }
    }

    /// Start tracking an artifact. A second artifact for the same message is
    /// ignored.
    pub fn add_artifact(&mut self, artifact: &ArtifactRef) -> bool {
        if self.artifacts.contains_key(&artifact.message_id) {
            debug!(message_id = %artifact.message_id, "artifact already tracked for message");
            return false;
        }

        info!(
            message_id = %artifact.message_id,
            artifact_id = artifact.id.as_deref().unwrap_or_default(),
            title = artifact.title.as_deref().unwrap_or_default(),
            "artifact opened"
        );
        let queue = ActionQueue::new(
            artifact.message_id.clone(),
            Arc::clone(&self.runner),
            self.updates.clone(),
        );
        self.order.push(artifact.message_id.clone());
        self.artifacts.insert(artifact.message_id.clone(), ArtifactEntry {
            artifact: artifact.clone(),
            closed: false,
            queue,
        });
        true
    }

    pub fn close_artifact(&mut self, artifact: &ArtifactRef) {
        match self.artifacts.get_mut(&artifact.message_id) {
            Some(entry) => entry.closed = true,
            None => warn!(message_id = %artifact.message_id, "closing unknown artifact"),
        }
    }

    /// Register a newly opened action as `Pending` on its artifact.
    ///
    /// Unlike [`Workbench::run_action`], an unknown artifact is only logged: the
    /// action has not run yet, so dropping it loses nothing.
    pub fn add_action(&mut self, event: &ActionEvent) {
        let Some(entry) = self.artifacts.get(&event.message_id) else {
            warn!(message_id = %event.message_id, action_id = %event.action_id, "action for unknown artifact");
            return;
        };
        entry.queue.register(event.action_id, event.action.clone());
    }

    /// Dispatch a closed action to its artifact's lane.
    ///
    /// # Panics
    ///
    /// Panics if the artifact or the action was never added.
    pub fn run_action(&mut self, event: &ActionEvent) {
        let Some(entry) = self.artifacts.get(&event.message_id) else {
            panic!(
                "action {} closed for message {} without an artifact",
                event.action_id, event.message_id
            );
        };
        entry.queue.dispatch(event.action_id, event.action.clone());
    }

    pub fn handle_event(&mut self, event: &ParserEvent) {
        match event {
            ParserEvent::ArtifactOpen(artifact) => {
                self.add_artifact(artifact);
            },
            ParserEvent::ArtifactClose(artifact) => self.close_artifact(artifact),
            ParserEvent::ActionOpen(action) => self.add_action(action),
            ParserEvent::ActionClose(action) => self.run_action(action),
        }
    }

    pub fn abort_all(&self) {
        for entry in self.artifacts.values() {
            entry.queue.abort_all();
        }
    }

    pub fn artifact(&self, message_id: &str) -> Option<&ArtifactEntry> {
        self.artifacts.get(message_id)
    }

    /// Artifacts in the order they were discovered.
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.order.iter().filter_map(|id| self.artifacts.get(id))
    }

    pub fn first_artifact(&self) -> Option<&ArtifactEntry> {
        self.artifacts().next()
    }

    /// Status updates of every lane.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionUpdate> {
        self.updates.subscribe()
    }

    /// Close every lane and wait for queued actions to finish.
    pub async fn shutdown(&mut self) {
        for id in &self.order {
            if let Some(entry) = self.artifacts.get_mut(id) {
                entry.queue.close().await;
            }
        }
    }
}
