//! Placeholder markup spliced into the display text where an artifact was.

use std::sync::Arc;

use boltline_protocol::ArtifactRef;

/// Turns an artifact into the markup the host mounts its artifact view on.
/// The parser treats the returned string as opaque.
pub type ArtifactElementFactory = Arc<dyn Fn(&ArtifactRef) -> String + Send + Sync>;

/// `<div class="__boltArtifact__" data-message-id="..."></div>`
pub fn default_artifact_element(artifact: &ArtifactRef) -> String {
    let message_id =
        serde_json::to_string(&artifact.message_id).unwrap_or_else(|_| String::from("\"\""));
    format!(r#"<div class="__boltArtifact__" data-message-id={message_id}></div>"#)
}

/// Elides artifacts from the display text entirely.
pub fn empty_artifact_element(_artifact: &ArtifactRef) -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use {super::*, boltline_protocol::ExtraAttributes};

    #[test]
    fn default_element_quotes_message_id() {
        let artifact = ArtifactRef {
            id: Some("a".into()),
            message_id: "msg \"1\"".into(),
            title: None,
            attributes: ExtraAttributes::new(),
        };
        assert_eq!(
            default_artifact_element(&artifact),
            r#"<div class="__boltArtifact__" data-message-id="msg \"1\""></div>"#
        );
    }
}
