use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use {
    boltline_protocol::{ActionId, BoltAction},
    tokio::{
        sync::{broadcast, mpsc},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

use crate::{
    runner::ActionRunner,
    state::{ActionState, ActionStatus, ActionUpdate},
};

/// Message stored for failed actions. Details only go to the log.
pub const FAILED_MESSAGE: &str = "Action failed";

struct Entry {
    state: ActionState,
    abort: CancellationToken,
}

struct Lane {
    key: String,
    entries: Mutex<BTreeMap<ActionId, Entry>>,
    updates: broadcast::Sender<ActionUpdate>,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ActionId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a status change unless the action already reached a final state.
    fn transition(&self, action_id: ActionId, status: ActionStatus, error: Option<String>) -> bool {
        {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(&action_id) else {
                return false;
            };
            if entry.state.status.is_terminal() || entry.state.status == status {
                return false;
            }
            entry.state.status = status;
            entry.state.error = error;
        }

        // No receivers is fine.
        let _ = self.updates.send(ActionUpdate {
            artifact: self.key.clone(),
            action_id,
            status,
        });
        true
    }

    /// Mark the action running and hand out what the worker needs, or `None`
    /// when it was aborted while queued.
    fn begin(&self, action_id: ActionId) -> Option<(BoltAction, CancellationToken)> {
        let (action, abort) = {
            let entries = self.lock();
            let entry = entries.get(&action_id)?;
            if entry.abort.is_cancelled() || entry.state.status.is_terminal() {
                return None;
            }
            (entry.state.action.clone(), entry.abort.clone())
        };
        self.transition(action_id, ActionStatus::Running, None);
        Some((action, abort))
    }
}

/// Serial execution lane for the actions of one artifact.
///
/// Actions run strictly one after another in dispatch order, which equals
/// discovery order. Must be created inside a tokio runtime.
pub struct ActionQueue {
    lane: Arc<Lane>,
    tx: Option<mpsc::UnboundedSender<ActionId>>,
    worker: Option<JoinHandle<()>>,
}

impl ActionQueue {
    pub fn new(
        key: impl Into<String>,
        runner: Arc<ActionRunner>,
        updates: broadcast::Sender<ActionUpdate>,
    ) -> Self {
        let lane = Arc::new(Lane {
            key: key.into(),
            entries: Mutex::new(BTreeMap::new()),
            updates,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_lane(Arc::clone(&lane), runner, rx));
        Self {
            lane,
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn key(&self) -> &str {
        &self.lane.key
    }

    /// Register a newly discovered action as `Pending`. Returns `false` if the
    /// id is already known.
    pub fn register(&self, action_id: ActionId, action: BoltAction) -> bool {
        let mut entries = self.lane.lock();
        if entries.contains_key(&action_id) {
            return false;
        }
        entries.insert(action_id, Entry {
            state: ActionState::pending(action_id, action),
            abort: CancellationToken::new(),
        });
        true
    }

    /// Queue a registered action with its final content. Repeated dispatches
    /// of the same id are ignored; actions of unknown type stay `Pending`.
    ///
    /// # Panics
    ///
    /// Panics if `action_id` was never registered: events and queue state are
    /// out of sync.
    pub fn dispatch(&self, action_id: ActionId, action: BoltAction) {
        let executable = {
            let mut entries = self.lane.lock();
            let Some(entry) = entries.get_mut(&action_id) else {
                panic!(
                    "action {action_id} of artifact {} dispatched before registration",
                    self.lane.key
                );
            };
            if entry.state.executed {
                return;
            }
            entry.state.executed = true;
            entry.state.action = action;
            entry.state.action.is_executable()
        };

        if !executable {
            debug!(artifact = %self.lane.key, %action_id, "action type is not executable");
            return;
        }

        match &self.tx {
            Some(tx) if tx.send(action_id).is_ok() => {},
            _ => warn!(artifact = %self.lane.key, %action_id, "lane closed, action not queued"),
        }
    }

    /// Abort one action. Queued actions never start; a running command is
    /// killed. Final states are left untouched.
    pub fn abort(&self, action_id: ActionId) -> bool {
        let token = {
            let entries = self.lane.lock();
            match entries.get(&action_id) {
                Some(entry) if !entry.state.status.is_terminal() => entry.abort.clone(),
                _ => return false,
            }
        };
        token.cancel();
        self.lane.transition(action_id, ActionStatus::Aborted, None)
    }

    pub fn abort_all(&self) {
        let ids: Vec<ActionId> = self.lane.lock().keys().copied().collect();
        for action_id in ids {
            self.abort(action_id);
        }
    }

    pub fn status(&self, action_id: ActionId) -> Option<ActionStatus> {
        self.lane.lock().get(&action_id).map(|e| e.state.status)
    }

    pub fn action(&self, action_id: ActionId) -> Option<ActionState> {
        self.lane.lock().get(&action_id).map(|e| e.state.clone())
    }

    /// All registered actions in id order.
    pub fn snapshot(&self) -> Vec<ActionState> {
        self.lane.lock().values().map(|e| e.state.clone()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionUpdate> {
        self.lane.updates.subscribe()
    }

    /// Stop accepting actions and wait until every queued one has finished.
    pub async fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            warn!(artifact = %self.lane.key, error = %e, "action worker ended abnormally");
        }
    }
}

async fn run_lane(
    lane: Arc<Lane>,
    runner: Arc<ActionRunner>,
    mut rx: mpsc::UnboundedReceiver<ActionId>,
) {
    while let Some(action_id) = rx.recv().await {
        let Some((action, abort)) = lane.begin(action_id) else {
            debug!(artifact = %lane.key, %action_id, "skipping aborted action");
            continue;
        };

        let result = runner.execute(&lane.key, action_id, &action, &abort).await;

        let (status, message) = if abort.is_cancelled() {
            (ActionStatus::Aborted, None)
        } else {
            match result {
                Ok(()) => (ActionStatus::Complete, None),
                Err(e) => {
                    error!(
                        artifact = %lane.key,
                        %action_id,
                        kind = action.kind(),
                        error = %format!("{e:#}"),
                        "action failed"
                    );
                    (ActionStatus::Failed, Some(FAILED_MESSAGE.to_string()))
                },
            }
        };
        lane.transition(action_id, status, message);
    }
    debug!(artifact = %lane.key, "action lane drained");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        boltline_sandbox::{MemorySandbox, ScriptedCommand},
    };

    fn shell(command: &str) -> BoltAction {
        BoltAction::Shell {
            content: command.into(),
        }
    }

    fn queue(sandbox: &Arc<MemorySandbox>) -> ActionQueue {
        let (updates, _) = broadcast::channel(64);
        ActionQueue::new("msg_1", Arc::new(ActionRunner::new(sandbox.clone())), updates)
    }

    fn add(queue: &ActionQueue, id: u32, action: BoltAction) {
        queue.register(ActionId(id), action.clone());
        queue.dispatch(ActionId(id), action);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_run_in_dispatch_order_despite_slow_middle() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("b", ScriptedCommand {
            delay: Some(Duration::from_secs(2)),
            ..ScriptedCommand::default()
        });

        let mut queue = queue(&sandbox);
        let mut updates = queue.subscribe();
        for (id, command) in ["a", "b", "c"].into_iter().enumerate() {
            add(&queue, id as u32, shell(command));
        }
        queue.close().await;

        assert_eq!(sandbox.spawned(), vec!["a", "b", "c"]);
        assert!(
            queue
                .snapshot()
                .iter()
                .all(|s| s.status == ActionStatus::Complete)
        );

        let mut order = Vec::new();
        while let Ok(update) = updates.try_recv() {
            order.push((update.action_id.0, update.status));
        }
        assert_eq!(order, vec![
            (0, ActionStatus::Running),
            (0, ActionStatus::Complete),
            (1, ActionStatus::Running),
            (1, ActionStatus::Complete),
            (2, ActionStatus::Running),
            (2, ActionStatus::Complete),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_running_action_kills_once() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("npm run dev", ScriptedCommand {
            hang: true,
            ..ScriptedCommand::default()
        });

        let mut queue = queue(&sandbox);
        let mut updates = queue.subscribe();
        add(&queue, 0, shell("npm run dev"));
        add(&queue, 1, shell("echo after"));

        let running = updates.recv().await.unwrap();
        assert_eq!(running.status, ActionStatus::Running);

        assert!(queue.abort(ActionId(0)));
        assert!(!queue.abort(ActionId(0)));
        queue.close().await;

        assert_eq!(queue.status(ActionId(0)), Some(ActionStatus::Aborted));
        assert_eq!(queue.status(ActionId(1)), Some(ActionStatus::Complete));
        assert_eq!(sandbox.kill_count("npm run dev"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_file_write_finishes_but_stays_aborted() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.slow_write("src/App.jsx", Duration::from_secs(2)).unwrap();

        let mut queue = queue(&sandbox);
        let mut updates = queue.subscribe();
        add(&queue, 0, BoltAction::File {
            file_path: "src/App.jsx".into(),
            content: "export default App;\n".into(),
        });

        let running = updates.recv().await.unwrap();
        assert_eq!(running.status, ActionStatus::Running);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.abort(ActionId(0)));
        queue.close().await;

        assert_eq!(
            sandbox.file("src/App.jsx").as_deref(),
            Some("export default App;\n")
        );
        assert_eq!(queue.status(ActionId(0)), Some(ActionStatus::Aborted));

        let mut statuses = Vec::new();
        while let Ok(update) = updates.try_recv() {
            statuses.push(update.status);
        }
        assert_eq!(statuses, vec![ActionStatus::Aborted]);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_pending_action_never_runs() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("slow", ScriptedCommand {
            delay: Some(Duration::from_secs(1)),
            ..ScriptedCommand::default()
        });

        let mut queue = queue(&sandbox);
        add(&queue, 0, shell("slow"));
        add(&queue, 1, shell("skipped"));
        assert!(queue.abort(ActionId(1)));
        assert_eq!(queue.status(ActionId(1)), Some(ActionStatus::Aborted));
        queue.close().await;

        assert_eq!(sandbox.spawned(), vec!["slow"]);
        assert_eq!(queue.status(ActionId(0)), Some(ActionStatus::Complete));
        assert_eq!(queue.status(ActionId(1)), Some(ActionStatus::Aborted));
    }

    #[tokio::test]
    async fn failure_is_recorded_and_lane_continues() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.fail_path("locked.txt").unwrap();

        let mut queue = queue(&sandbox);
        add(&queue, 0, BoltAction::File {
            file_path: "locked.txt".into(),
            content: "x\n".into(),
        });
        add(&queue, 1, shell("echo next"));
        queue.close().await;

        let failed = queue.action(ActionId(0)).unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(FAILED_MESSAGE));
        assert_eq!(queue.status(ActionId(1)), Some(ActionStatus::Complete));
    }

    #[tokio::test]
    async fn register_and_dispatch_are_idempotent() {
        let sandbox = Arc::new(MemorySandbox::new());
        let mut queue = queue(&sandbox);

        assert!(queue.register(ActionId(0), shell("")));
        assert!(!queue.register(ActionId(0), shell("ignored")));
        queue.dispatch(ActionId(0), shell("npm install"));
        queue.dispatch(ActionId(0), shell("npm install"));
        queue.close().await;

        assert_eq!(sandbox.spawned(), vec!["npm install"]);
        let state = queue.action(ActionId(0)).unwrap();
        assert!(state.executed);
        assert_eq!(state.action.content(), "npm install");
    }

    #[tokio::test]
    async fn unknown_actions_stay_pending() {
        let sandbox = Arc::new(MemorySandbox::new());
        let mut queue = queue(&sandbox);
        add(&queue, 0, BoltAction::Unknown {
            action_type: Some("deploy".into()),
            content: "prod".into(),
        });
        queue.close().await;

        assert_eq!(queue.status(ActionId(0)), Some(ActionStatus::Pending));
        assert!(sandbox.spawned().is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "dispatched before registration")]
    async fn dispatching_unregistered_action_panics() {
        let sandbox = Arc::new(MemorySandbox::new());
        let queue = queue(&sandbox);
        queue.dispatch(ActionId(7), shell("ls"));
    }

    #[tokio::test]
    async fn terminal_actions_ignore_abort() {
        let sandbox = Arc::new(MemorySandbox::new());
        let mut queue = queue(&sandbox);
        add(&queue, 0, shell("ls"));
        queue.close().await;

        assert!(!queue.abort(ActionId(0)));
        queue.abort_all();
        assert_eq!(queue.status(ActionId(0)), Some(ActionStatus::Complete));
    }
}
