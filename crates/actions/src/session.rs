use std::collections::HashMap;

use boltline_parser::{ParseContext, StreamingMessageParser};

use crate::workbench::Workbench;

/// One conversation: parser state, accumulated display text per message and
/// the workbench its actions run on.
pub struct Session {
    ctx: ParseContext,
    parser: StreamingMessageParser,
    workbench: Workbench,
    displays: HashMap<String, String>,
}

impl Session {
    pub fn new(parser: StreamingMessageParser, workbench: Workbench) -> Self {
        Self {
            ctx: ParseContext::new(),
            parser,
            workbench,
            displays: HashMap::new(),
        }
    }

    /// Feed the full current text of a message. Parser events are applied to
    /// the workbench; returns the display text accumulated so far.
    pub fn ingest(&mut self, message_id: &str, text: &str) -> &str {
        let output = self.parser.parse(&mut self.ctx, message_id, text);
        for event in &output.events {
            self.workbench.handle_event(event);
        }

        let display = self.displays.entry(message_id.to_string()).or_default();
        display.push_str(&output.display);
        display
    }

    pub fn display(&self, message_id: &str) -> Option<&str> {
        self.displays.get(message_id).map(String::as_str)
    }

    /// Forget a message's parser state and display text. Its artifact stays
    /// on the workbench.
    pub fn dispose(&mut self, message_id: &str) {
        self.ctx.dispose_message(message_id);
        self.displays.remove(message_id);
    }

    pub fn workbench(&self) -> &Workbench {
        &self.workbench
    }

    pub fn workbench_mut(&mut self) -> &mut Workbench {
        &mut self.workbench
    }

    /// Wait for every queued action to finish.
    pub async fn shutdown(&mut self) {
        self.workbench.shutdown().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use {
        super::*,
        crate::{runner::ActionRunner, state::ActionStatus},
        boltline_parser::empty_artifact_element,
        boltline_sandbox::MemorySandbox,
    };

    const RESPONSE: &str = "Setting up.\n<boltArtifact id=\"app\" title=\"App\">\n<boltAction type=\"file\" filePath=\"src/main.js\">\nconsole.log('hi');\n</boltAction>\n<boltAction type=\"shell\">node src/main.js</boltAction>\n</boltArtifact>\nAll set.";

    fn session(sandbox: &Arc<MemorySandbox>) -> Session {
        Session::new(
            StreamingMessageParser::with_artifact_element(Arc::new(empty_artifact_element)),
            Workbench::new(Arc::new(ActionRunner::new(sandbox.clone()))),
        )
    }

    #[tokio::test]
    async fn streamed_response_runs_actions_in_order() {
        let sandbox = Arc::new(MemorySandbox::new());
        let mut session = session(&sandbox);

        let mut end = 0;
        while end < RESPONSE.len() {
            end = (end + 7).min(RESPONSE.len());
            while !RESPONSE.is_char_boundary(end) {
                end += 1;
            }
            session.ingest("msg_1", &RESPONSE[..end]);
        }
        session.shutdown().await;

        assert_eq!(session.display("msg_1"), Some("Setting up.\n\nAll set."));
        assert_eq!(sandbox.file("src/main.js").as_deref(), Some("console.log('hi');\n"));
        assert_eq!(sandbox.spawned(), vec!["node src/main.js"]);

        let entry = session.workbench().first_artifact().unwrap();
        assert!(entry.is_closed());
        let statuses: Vec<_> = entry.queue().snapshot().iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![ActionStatus::Complete, ActionStatus::Complete]);
    }

    #[tokio::test]
    async fn ingest_returns_accumulated_display() {
        let sandbox = Arc::new(MemorySandbox::new());
        let mut session = session(&sandbox);
        assert_eq!(session.ingest("m", "Hello <b"), "Hello ");
        assert_eq!(session.ingest("m", "Hello <b>world</b>"), "Hello <b>world</b>");

        session.dispose("m");
        assert_eq!(session.display("m"), None);
        assert_eq!(session.ingest("m", "again"), "again");
        session.shutdown().await;
    }
}
