//! Batch operation translator: declarative skill operations to actions.
//!
//! DESIGN
//! ======
//! Operations are parsed one at a time from raw JSON. A malformed operation
//! is skipped with a warning and recorded in `Translation::skipped`; the
//! rest of the batch still translates.
//!
//! Output order is fixed: every `clear` as its own `CLEAR_CANVAS` (in input
//! order), then one `ADD_OBJECTS` with every addition, then one
//! `UPDATE_OBJECTS` with every update. A skill batch describes the canvas it
//! wants to end with, so wiping happens before drawing.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use super::action::{ClearScope, ObjectUpdate, WhiteboardAction};
use super::object::{CanvasObjectSpec, Geometry, ObjectKind, ObjectMetadata, Style, normalize_update};

// =============================================================================
// OPERATIONS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SkillOperation {
    AddText(AddText),
    AddShape(AddShape),
    UpdateObject(UpdateObject),
    Clear(Clear),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddText {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    font_size: Option<f64>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    x_pct: Option<f64>,
    #[serde(default)]
    y_pct: Option<f64>,
    #[serde(default)]
    width_pct: Option<f64>,
    #[serde(default)]
    fill: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddShape {
    #[serde(default)]
    id: Option<String>,
    shape: ObjectKind,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    x_pct: Option<f64>,
    #[serde(default)]
    y_pct: Option<f64>,
    #[serde(default)]
    width_pct: Option<f64>,
    #[serde(default)]
    height_pct: Option<f64>,
    #[serde(default)]
    fill: Option<String>,
    #[serde(default)]
    stroke: Option<String>,
    #[serde(default)]
    stroke_width: Option<f64>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateObject {
    object_id: String,
    updates: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct Clear {
    #[serde(default = "default_clear_scope")]
    scope: ClearScope,
}

fn default_clear_scope() -> ClearScope {
    ClearScope::All
}

// =============================================================================
// OUTPUT
// =============================================================================

/// An operation that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub actions: Vec<WhiteboardAction>,
    pub skipped: Vec<SkippedOperation>,
}

// =============================================================================
// TRANSLATE
// =============================================================================

/// Consolidate declarative operations into the fewest canvas actions.
#[must_use]
pub fn translate(operations: &[Value]) -> Translation {
    let mut clears = Vec::new();
    let mut additions = Vec::new();
    let mut updates = Vec::new();
    let mut skipped = Vec::new();

    for (index, raw) in operations.iter().enumerate() {
        let op = match SkillOperation::deserialize(raw) {
            Ok(op) => op,
            Err(e) => {
                warn!(index, error = %e, "skill batch: skipping malformed operation");
                skipped.push(SkippedOperation { index, reason: e.to_string() });
                continue;
            }
        };

        match op {
            SkillOperation::AddText(op) => additions.push(text_spec(op)),
            SkillOperation::AddShape(op) => {
                if op.shape.is_ephemeral() {
                    let reason = format!("shape {:?} is ephemeral", op.shape);
                    warn!(index, %reason, "skill batch: skipping operation");
                    skipped.push(SkippedOperation { index, reason });
                    continue;
                }
                additions.push(shape_spec(op));
            }
            SkillOperation::UpdateObject(op) => {
                if op.object_id.trim().is_empty() {
                    let reason = "update_object without objectId".to_owned();
                    warn!(index, %reason, "skill batch: skipping operation");
                    skipped.push(SkippedOperation { index, reason });
                    continue;
                }
                let mut changes = op.updates;
                normalize_update(&mut changes);
                updates.push(ObjectUpdate { object_id: op.object_id, updates: changes });
            }
            SkillOperation::Clear(op) => clears.push(WhiteboardAction::ClearCanvas { scope: op.scope }),
        }
    }

    let mut actions = clears;
    if !additions.is_empty() {
        actions.push(WhiteboardAction::AddObjects { objects: additions });
    }
    if !updates.is_empty() {
        actions.push(WhiteboardAction::UpdateObjects { objects: updates });
    }

    Translation { actions, skipped }
}

fn generated_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn text_spec(op: AddText) -> CanvasObjectSpec {
    let mut spec = CanvasObjectSpec::new(op.id.unwrap_or_else(|| generated_id("text")), ObjectKind::Textbox);
    spec.geometry = Geometry {
        x: op.x,
        y: op.y,
        width: op.width,
        x_pct: op.x_pct,
        y_pct: op.y_pct,
        width_pct: op.width_pct,
        ..Geometry::default()
    };
    spec.geometry.normalize();
    spec.style = Style { fill: op.fill, ..Style::default() };
    spec.metadata = op.metadata.unwrap_or_default();
    spec.extra.insert("text".into(), Value::String(op.text));
    if let Some(size) = op.font_size {
        spec.extra.insert("fontSize".into(), serde_json::json!(size));
    }
    spec
}

fn shape_spec(op: AddShape) -> CanvasObjectSpec {
    let prefix = serde_json::to_value(op.shape)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "shape".to_owned());
    let mut spec = CanvasObjectSpec::new(op.id.unwrap_or_else(|| generated_id(&prefix)), op.shape);
    spec.geometry = Geometry {
        x: op.x,
        y: op.y,
        width: op.width,
        height: op.height,
        x_pct: op.x_pct,
        y_pct: op.y_pct,
        width_pct: op.width_pct,
        height_pct: op.height_pct,
    };
    spec.geometry.normalize();
    spec.style = Style { fill: op.fill, stroke: op.stroke, stroke_width: op.stroke_width };
    spec.metadata = op.metadata.unwrap_or_default();
    spec
}

#[cfg(test)]
#[path = "translate_test.rs"]
mod tests;
