//! Whiteboard actions: the tagged union stored in the snapshot log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::object::{CanvasObjectSpec, ObjectKind, ObjectSource};

/// Scope of a `CLEAR_CANVAS` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    All,
    Selection,
    Mcq,
    Diagrams,
    Tables,
    AssistantContent,
}

impl ClearScope {
    /// Whether a durable object falls inside this scope. `Selection` is a
    /// client-side notion and matches nothing on the server.
    #[must_use]
    pub fn matches(self, spec: &CanvasObjectSpec) -> bool {
        match self {
            Self::All => true,
            Self::Selection => false,
            Self::Mcq => spec.kind == ObjectKind::Radio || spec.role() == Some("mcq"),
            Self::Diagrams => spec.kind == ObjectKind::Group || spec.role() == Some("diagram"),
            Self::Tables => spec.role() == Some("table"),
            Self::AssistantContent => spec.metadata.source == ObjectSource::Assistant,
        }
    }
}

/// A partial update for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpdate {
    pub object_id: String,
    pub updates: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WhiteboardAction {
    AddObjects {
        objects: Vec<CanvasObjectSpec>,
    },
    UpdateObjects {
        objects: Vec<ObjectUpdate>,
    },
    DeleteObjects {
        ids: Vec<String>,
    },
    ClearCanvas {
        scope: ClearScope,
    },
    HighlightObject {
        target_object_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
        #[serde(default)]
        pulse: bool,
    },
}

impl WhiteboardAction {
    /// Hydration sequence for a client with no prior local state: wipe the
    /// surface, then repopulate it.
    #[must_use]
    pub fn hydration(objects: Vec<CanvasObjectSpec>) -> Vec<Self> {
        let mut actions = vec![Self::ClearCanvas { scope: ClearScope::All }];
        if !objects.is_empty() {
            actions.push(Self::AddObjects { objects });
        }
        actions
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddObjects { .. } => "ADD_OBJECTS",
            Self::UpdateObjects { .. } => "UPDATE_OBJECTS",
            Self::DeleteObjects { .. } => "DELETE_OBJECTS",
            Self::ClearCanvas { .. } => "CLEAR_CANVAS",
            Self::HighlightObject { .. } => "HIGHLIGHT_OBJECT",
        }
    }
}

/// A group of actions submitted together. The id is client-supplied or
/// generated on acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBatch {
    pub batch_id: String,
    pub actions: Vec<WhiteboardAction>,
}

impl ActionBatch {
    #[must_use]
    pub fn new(batch_id: Option<String>, actions: Vec<WhiteboardAction>) -> Self {
        let batch_id = batch_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self { batch_id, actions }
    }

    /// Serialized `WhiteboardAction[]` as stored in a snapshot record.
    ///
    /// # Errors
    ///
    /// Returns an error if an action cannot be encoded.
    pub fn actions_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_objects_wire_shape() {
        let action = WhiteboardAction::AddObjects { objects: vec![CanvasObjectSpec::new("r1", ObjectKind::Rect)] };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "ADD_OBJECTS");
        assert_eq!(value["objects"][0]["id"], "r1");
        assert_eq!(value["objects"][0]["kind"], "rect");
    }

    #[test]
    fn highlight_parses_camel_case_fields() {
        let action: WhiteboardAction = serde_json::from_value(json!({
            "type": "HIGHLIGHT_OBJECT",
            "targetObjectId": "t1",
            "color": "#ff0",
            "pulse": true
        }))
        .unwrap();
        assert_eq!(
            action,
            WhiteboardAction::HighlightObject { target_object_id: "t1".into(), color: Some("#ff0".into()), pulse: true }
        );
    }

    #[test]
    fn clear_scope_assistant_content() {
        let action: WhiteboardAction =
            serde_json::from_value(json!({"type": "CLEAR_CANVAS", "scope": "assistant_content"})).unwrap();
        assert_eq!(action, WhiteboardAction::ClearCanvas { scope: ClearScope::AssistantContent });
    }

    #[test]
    fn clear_scope_matching() {
        let mut mcq = CanvasObjectSpec::new("q", ObjectKind::Radio);
        let mut table = CanvasObjectSpec::new("t", ObjectKind::Rect);
        table.metadata.role = Some("table".into());
        let mut diagram = CanvasObjectSpec::new("d", ObjectKind::Path);
        diagram.metadata.role = Some("diagram".into());
        let mut assistant = CanvasObjectSpec::new("a", ObjectKind::Text);
        assistant.metadata.source = ObjectSource::Assistant;

        assert!(ClearScope::Mcq.matches(&mcq));
        assert!(!ClearScope::Mcq.matches(&table));
        assert!(ClearScope::Tables.matches(&table));
        assert!(ClearScope::Diagrams.matches(&diagram));
        assert!(ClearScope::AssistantContent.matches(&assistant));
        assert!(!ClearScope::AssistantContent.matches(&table));
        assert!(ClearScope::All.matches(&table));

        mcq.metadata.role = Some("mcq".into());
        assert!(!ClearScope::Selection.matches(&mcq));
    }

    #[test]
    fn hydration_clears_then_adds() {
        let actions = WhiteboardAction::hydration(vec![CanvasObjectSpec::new("r1", ObjectKind::Rect)]);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], WhiteboardAction::ClearCanvas { scope: ClearScope::All });
        assert_eq!(actions[1].name(), "ADD_OBJECTS");

        let empty = WhiteboardAction::hydration(Vec::new());
        assert_eq!(empty, vec![WhiteboardAction::ClearCanvas { scope: ClearScope::All }]);
    }

    #[test]
    fn batch_generates_id_when_missing_or_blank() {
        let batch = ActionBatch::new(None, Vec::new());
        assert!(!batch.batch_id.is_empty());
        let blank = ActionBatch::new(Some("  ".into()), Vec::new());
        assert_ne!(blank.batch_id.trim(), "");
        let given = ActionBatch::new(Some("b-1".into()), Vec::new());
        assert_eq!(given.batch_id, "b-1");
    }
}
