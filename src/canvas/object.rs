//! Canvas object spec: the atomic unit of whiteboard content.
//!
//! DESIGN
//! ======
//! Geometry is carried in two coordinate systems: absolute pixels and
//! percentages of the canvas. The percentage form wins whenever it is
//! present for an axis, because it survives clients with different canvas
//! sizes. `Geometry::normalize` enforces that by nulling the absolute
//! counterpart.
//!
//! Fields the server does not interpret (text, font size, option lists,
//! image sources, ...) ride along in `extra` so that round-tripping an
//! object through the server never loses client data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frame::ErrorCode;

pub const POINTER_PING_TTL_MS: i64 = 3_000;
pub const HIGHLIGHT_STROKE_TTL_MS: i64 = 60_000;

// =============================================================================
// KIND
// =============================================================================

/// Closed set of renderable object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Rect,
    Ellipse,
    Circle,
    Text,
    Textbox,
    Line,
    Path,
    Polygon,
    Triangle,
    Group,
    Image,
    HighlightStroke,
    QuestionTag,
    PointerPing,
    #[serde(alias = "option-selector", alias = "option_selector")]
    Radio,
}

impl ObjectKind {
    /// Kinds that live in the ephemeral store and never enter the action log.
    #[must_use]
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::HighlightStroke | Self::QuestionTag | Self::PointerPing)
    }

    /// TTL applied when a client omits `expiresAt`. `None` means the object
    /// stays until it is removed explicitly or the session is torn down.
    #[must_use]
    pub fn default_ttl_ms(self) -> Option<i64> {
        match self {
            Self::PointerPing => Some(POINTER_PING_TTL_MS),
            Self::QuestionTag => None,
            _ => Some(HIGHLIGHT_STROKE_TTL_MS),
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.to_owned())).ok()
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Position and size, absolute or percentage-relative per axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_pct: Option<f64>,
}

/// `(percentage key, absolute key)` wire names for each axis.
pub const AXIS_KEYS: [(&str, &str); 4] = [("xPct", "x"), ("yPct", "y"), ("widthPct", "width"), ("heightPct", "height")];

impl Geometry {
    /// Drop absolute values on every axis that also carries a percentage.
    pub fn normalize(&mut self) {
        if self.x_pct.is_some() {
            self.x = None;
        }
        if self.y_pct.is_some() {
            self.y = None;
        }
        if self.width_pct.is_some() {
            self.width = None;
        }
        if self.height_pct.is_some() {
            self.height = None;
        }
    }
}

/// Apply percentage precedence to a partial update map: any axis whose
/// percentage is supplied gets its absolute key set to an explicit `null`,
/// so a stale pixel value cannot resurface after a resize.
pub fn normalize_update(changes: &mut Map<String, Value>) {
    for (pct, abs) in AXIS_KEYS {
        let has_pct = changes.get(pct).is_some_and(|v| !v.is_null());
        if has_pct {
            changes.insert(abs.to_owned(), Value::Null);
        }
    }
}

// =============================================================================
// STYLE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

// =============================================================================
// METADATA
// =============================================================================

/// Who authored an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectSource {
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorEdge {
    Top,
    Bottom,
    Left,
    Right,
    Center,
}

/// Placement relative to another object's rendered bounds. Resolved by the
/// rendering client; the server only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub object_id: String,
    pub edge: AnchorEdge,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub source: ObjectSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
}

// =============================================================================
// OBJECT SPEC
// =============================================================================

/// One whiteboard element as it travels over the wire and into storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasObjectSpec {
    pub id: String,
    pub kind: ObjectKind,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(flatten)]
    pub style: Style,
    #[serde(default)]
    pub metadata: ObjectMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CanvasObjectSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            geometry: Geometry::default(),
            style: Style::default(),
            metadata: ObjectMetadata::default(),
            extra: Map::new(),
        }
    }

    /// Role tag, if any, as a plain string.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.metadata.role.as_deref()
    }

    /// Merge a partial update into this object. `null` removes a field;
    /// `id` is immutable and silently ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdate` if the merged object no longer parses (for
    /// example, an unknown `kind`).
    pub fn merged(&self, changes: &Map<String, Value>) -> Result<Self, SpecError> {
        let mut value = serde_json::to_value(self).map_err(|e| SpecError::InvalidUpdate(e.to_string()))?;
        let Value::Object(fields) = &mut value else {
            return Err(SpecError::InvalidUpdate("object did not serialize to a map".into()));
        };

        for (key, change) in changes {
            if key == "id" {
                continue;
            }
            if key == "metadata" {
                merge_metadata(fields, change);
                continue;
            }
            if change.is_null() {
                fields.remove(key);
            } else {
                fields.insert(key.clone(), change.clone());
            }
        }

        let mut merged: Self = serde_json::from_value(value).map_err(|e| SpecError::InvalidUpdate(e.to_string()))?;
        merged.geometry.normalize();
        Ok(merged)
    }
}

fn merge_metadata(fields: &mut Map<String, Value>, change: &Value) {
    let Value::Object(patch) = change else {
        if change.is_null() {
            fields.remove("metadata");
        }
        return;
    };
    let entry = fields
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(current) = entry else {
        *entry = change.clone();
        return;
    };
    for (key, value) in patch {
        if value.is_null() {
            current.remove(key);
        } else {
            current.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("invalid object update: {0}")]
    InvalidUpdate(String),
    #[error("object kind {0:?} is not ephemeral")]
    NotEphemeral(ObjectKind),
    #[error("object id must not be empty")]
    EmptyId,
}

impl ErrorCode for SpecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUpdate(_) => "E_INVALID_UPDATE",
            Self::NotEphemeral(_) => "E_NOT_EPHEMERAL",
            Self::EmptyId => "E_EMPTY_ID",
        }
    }
}

// =============================================================================
// EPHEMERAL OBJECT
// =============================================================================

/// A time-boxed annotation. Wraps a spec whose kind is ephemeral and whose
/// metadata carries the owning user and (except for question tags) an
/// expiry timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EphemeralObject(CanvasObjectSpec);

impl EphemeralObject {
    /// Validate a client spec and stamp server-owned fields: the owner is
    /// always the authenticated user, and a missing expiry is filled from
    /// the kind's default TTL.
    ///
    /// # Errors
    ///
    /// Returns `NotEphemeral` for durable kinds and `EmptyId` for blank ids.
    pub fn stamp(mut spec: CanvasObjectSpec, owner_id: &str, now_ms: i64) -> Result<Self, SpecError> {
        if spec.id.trim().is_empty() {
            return Err(SpecError::EmptyId);
        }
        if !spec.kind.is_ephemeral() {
            return Err(SpecError::NotEphemeral(spec.kind));
        }
        spec.metadata.owner_id = Some(owner_id.to_owned());
        if spec.metadata.expires_at.is_none() {
            spec.metadata.expires_at = spec
                .kind
                .default_ttl_ms()
                .map(|ttl| now_ms.saturating_add(ttl));
        }
        spec.geometry.normalize();
        Ok(Self(spec))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.id
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.0.metadata.expires_at
    }

    #[must_use]
    pub fn owner_id(&self) -> Option<&str> {
        self.0.metadata.owner_id.as_deref()
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at().is_some_and(|at| at <= now_ms)
    }

    #[must_use]
    pub fn spec(&self) -> &CanvasObjectSpec {
        &self.0
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
