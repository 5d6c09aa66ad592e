//! Typed update payloads.
//!
//! Every update kind the client understands is a variant of [`UpdateKind`],
//! and every variant has a typed payload in [`Update`]. Handlers are selected
//! by matching on [`Update`], so a new kind cannot be added without a handler.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a UI element.
pub type ElementId = u64;

/// The closed set of known update kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Element tree patch.
    Update,
    /// Run a script in the host.
    RunJavascript,
    /// Navigate to a path.
    Open,
    /// Start a download.
    Download,
    /// Show a notification.
    Notify,
}

impl UpdateKind {
    /// All known kinds.
    pub const ALL: [UpdateKind; 5] = [
        UpdateKind::Update,
        UpdateKind::RunJavascript,
        UpdateKind::Open,
        UpdateKind::Download,
        UpdateKind::Notify,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Update => "update",
            UpdateKind::RunJavascript => "run_javascript",
            UpdateKind::Open => "open",
            UpdateKind::Download => "download",
            UpdateKind::Notify => "notify",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> ProtocolResult<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ProtocolError::UnknownKind(name.to_string()))
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element tree patch: element id to new element, or `None` for a deletion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementPatch(pub BTreeMap<ElementId, Option<Value>>);

impl ElementPatch {
    /// Returns the number of touched elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the patch touches nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Script to run in the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJavascript {
    /// Source code.
    pub code: String,
    /// Correlation id if the peer waits for the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Navigation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTarget {
    /// Absolute URL or path relative to the client prefix.
    pub path: String,
    /// Open in a new tab instead of replacing the current one.
    #[serde(default)]
    pub new_tab: bool,
}

/// Download request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URL or path.
    pub src: String,
    /// Suggested file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Media type of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Notification with presentation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Content to show. Usually text, but any value is handed to the
    /// presentation layer as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Remaining presentation options, passed through untouched.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// A decoded update.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Element tree patch.
    Elements(ElementPatch),
    /// Run a script.
    RunJavascript(RunJavascript),
    /// Navigate.
    Open(OpenTarget),
    /// Download.
    Download(DownloadRequest),
    /// Notify.
    Notify(Notification),
}

impl Update {
    /// Decodes a payload for the given kind.
    pub fn decode(kind: UpdateKind, payload: Value) -> ProtocolResult<Self> {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: UpdateKind,
            payload: Value,
        ) -> ProtocolResult<T> {
            serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
                kind: kind.as_str(),
                source,
            })
        }

        Ok(match kind {
            UpdateKind::Update => Update::Elements(typed(kind, payload)?),
            UpdateKind::RunJavascript => Update::RunJavascript(typed(kind, payload)?),
            UpdateKind::Open => Update::Open(typed(kind, payload)?),
            UpdateKind::Download => Update::Download(typed(kind, payload)?),
            UpdateKind::Notify => Update::Notify(typed(kind, payload)?),
        })
    }

    /// Returns the kind of this update.
    pub fn kind(&self) -> UpdateKind {
        match self {
            Update::Elements(_) => UpdateKind::Update,
            Update::RunJavascript(_) => UpdateKind::RunJavascript,
            Update::Open(_) => UpdateKind::Open,
            Update::Download(_) => UpdateKind::Download,
            Update::Notify(_) => UpdateKind::Notify,
        }
    }

    /// Encodes the payload back to JSON.
    pub fn to_payload(&self) -> ProtocolResult<Value> {
        let value = match self {
            Update::Elements(patch) => serde_json::to_value(patch)?,
            Update::RunJavascript(script) => serde_json::to_value(script)?,
            Update::Open(target) => serde_json::to_value(target)?,
            Update::Download(request) => serde_json::to_value(request)?,
            Update::Notify(notification) => serde_json::to_value(notification)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_round_trip() {
        for kind in UpdateKind::ALL {
            assert_eq!(UpdateKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = UpdateKind::parse("syncronize").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(name) if name == "syncronize"));
    }

    #[test]
    fn decodes_element_patch_with_deletions() {
        let payload = json!({"3": {"tag": "div"}, "7": null});
        let update = Update::decode(UpdateKind::Update, payload).unwrap();

        let Update::Elements(patch) = update else {
            panic!("expected element patch");
        };
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.0[&3], Some(json!({"tag": "div"})));
        assert_eq!(patch.0[&7], None);
    }

    #[test]
    fn notification_keeps_unknown_options() {
        let payload = json!({"message": "saved", "position": "top", "timeout": 500});
        let update = Update::decode(UpdateKind::Notify, payload).unwrap();

        let Update::Notify(notification) = update else {
            panic!("expected notification");
        };
        assert_eq!(notification.message, Some(json!("saved")));
        assert_eq!(notification.options["position"], "top");
        assert_eq!(notification.options["timeout"], 500);
    }

    #[test]
    fn notification_accepts_non_text_messages() {
        for message in [json!(42), json!({"html": "<b>done</b>"}), json!(["a", "b"])] {
            let payload = json!({"message": message.clone(), "color": "positive"});
            let update = Update::decode(UpdateKind::Notify, payload).unwrap();

            let Update::Notify(notification) = update else {
                panic!("expected notification");
            };
            assert_eq!(notification.message, Some(message));
            assert_eq!(notification.options["color"], "positive");
        }

        let update = Update::decode(UpdateKind::Notify, json!({"message": null})).unwrap();
        assert_eq!(update, Update::Notify(Notification::default()));
    }

    #[test]
    fn invalid_payload_names_the_kind() {
        let err = Update::decode(UpdateKind::Open, json!({"new_tab": true})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { kind: "open", .. }));
    }

    #[test]
    fn open_defaults_to_same_tab() {
        let update = Update::decode(UpdateKind::Open, json!({"path": "/devices"})).unwrap();
        assert_eq!(
            update,
            Update::Open(OpenTarget {
                path: "/devices".into(),
                new_tab: false,
            })
        );
        assert_eq!(update.kind(), UpdateKind::Open);
    }
}
