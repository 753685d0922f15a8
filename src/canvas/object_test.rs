use super::*;
use serde_json::json;

// =============================================================================
// ObjectKind
// =============================================================================

#[test]
fn kind_parses_option_selector_alias() {
    assert_eq!(ObjectKind::parse("radio"), Some(ObjectKind::Radio));
    assert_eq!(ObjectKind::parse("option-selector"), Some(ObjectKind::Radio));
    assert_eq!(ObjectKind::parse("highlight_stroke"), Some(ObjectKind::HighlightStroke));
    assert_eq!(ObjectKind::parse("sticky_note"), None);
}

#[test]
fn ephemeral_kinds() {
    assert!(ObjectKind::PointerPing.is_ephemeral());
    assert!(ObjectKind::HighlightStroke.is_ephemeral());
    assert!(ObjectKind::QuestionTag.is_ephemeral());
    assert!(!ObjectKind::Rect.is_ephemeral());
    assert!(!ObjectKind::Radio.is_ephemeral());
}

#[test]
fn default_ttls() {
    assert_eq!(ObjectKind::PointerPing.default_ttl_ms(), Some(POINTER_PING_TTL_MS));
    assert_eq!(ObjectKind::HighlightStroke.default_ttl_ms(), Some(HIGHLIGHT_STROKE_TTL_MS));
    assert_eq!(ObjectKind::QuestionTag.default_ttl_ms(), None);
}

// =============================================================================
// CanvasObjectSpec wire format
// =============================================================================

#[test]
fn spec_parses_flat_geometry_style_and_extra() {
    let spec: CanvasObjectSpec = serde_json::from_value(json!({
        "id": "t1",
        "kind": "textbox",
        "xPct": 10,
        "yPct": 20.5,
        "fill": "#000",
        "strokeWidth": 2,
        "text": "Photosynthesis",
        "fontSize": 18,
        "metadata": { "source": "assistant", "role": "heading", "anchor": { "objectId": "r1", "edge": "bottom", "gap": 8 } }
    }))
    .unwrap();

    assert_eq!(spec.kind, ObjectKind::Textbox);
    assert_eq!(spec.geometry.x_pct, Some(10.0));
    assert_eq!(spec.geometry.y_pct, Some(20.5));
    assert_eq!(spec.geometry.x, None);
    assert_eq!(spec.style.fill.as_deref(), Some("#000"));
    assert_eq!(spec.style.stroke_width, Some(2.0));
    assert_eq!(spec.metadata.source, ObjectSource::Assistant);
    assert_eq!(spec.role(), Some("heading"));
    let anchor = spec.metadata.anchor.as_ref().unwrap();
    assert_eq!(anchor.object_id, "r1");
    assert_eq!(anchor.edge, AnchorEdge::Bottom);
    assert_eq!(spec.extra.get("text"), Some(&json!("Photosynthesis")));
    assert_eq!(spec.extra.get("fontSize"), Some(&json!(18)));
    assert!(!spec.extra.contains_key("xPct"));
    assert!(!spec.extra.contains_key("fill"));
}

#[test]
fn spec_serializes_without_empty_fields() {
    let mut spec = CanvasObjectSpec::new("r1", ObjectKind::Rect);
    spec.geometry.x = Some(5.0);
    let value = serde_json::to_value(&spec).unwrap();
    assert_eq!(value["x"], json!(5.0));
    assert!(value.get("y").is_none());
    assert!(value.get("fill").is_none());
    assert_eq!(value["metadata"]["source"], "user");
}

#[test]
fn spec_rejects_unknown_kind() {
    let result = serde_json::from_value::<CanvasObjectSpec>(json!({"id": "x", "kind": "hexagon"}));
    assert!(result.is_err());
}

// =============================================================================
// Geometry precedence
// =============================================================================

#[test]
fn normalize_drops_absolute_when_percentage_present() {
    let mut g = Geometry { x: Some(100.0), x_pct: Some(50.0), y: Some(20.0), ..Geometry::default() };
    g.normalize();
    assert_eq!(g.x, None);
    assert_eq!(g.x_pct, Some(50.0));
    assert_eq!(g.y, Some(20.0));
}

#[test]
fn normalize_update_nulls_absolute_counterpart() {
    let mut changes = Map::new();
    changes.insert("xPct".into(), json!(25));
    changes.insert("x".into(), json!(300));
    changes.insert("y".into(), json!(40));
    normalize_update(&mut changes);
    assert_eq!(changes.get("xPct"), Some(&json!(25)));
    assert_eq!(changes.get("x"), Some(&Value::Null));
    assert_eq!(changes.get("y"), Some(&json!(40)));
    assert!(!changes.contains_key("height"));
}

#[test]
fn normalize_update_ignores_null_percentage() {
    let mut changes = Map::new();
    changes.insert("widthPct".into(), Value::Null);
    changes.insert("width".into(), json!(80));
    normalize_update(&mut changes);
    assert_eq!(changes.get("width"), Some(&json!(80)));
}

// =============================================================================
// merged
// =============================================================================

#[test]
fn merged_applies_changes_and_removes_nulls() {
    let mut spec = CanvasObjectSpec::new("r1", ObjectKind::Rect);
    spec.geometry.x = Some(10.0);
    spec.style.fill = Some("#fff".into());

    let mut changes = Map::new();
    changes.insert("xPct".into(), json!(40));
    changes.insert("x".into(), Value::Null);
    changes.insert("fill".into(), Value::Null);
    changes.insert("id".into(), json!("hijacked"));
    changes.insert("label".into(), json!("A"));

    let merged = spec.merged(&changes).unwrap();
    assert_eq!(merged.id, "r1");
    assert_eq!(merged.geometry.x, None);
    assert_eq!(merged.geometry.x_pct, Some(40.0));
    assert_eq!(merged.style.fill, None);
    assert_eq!(merged.extra.get("label"), Some(&json!("A")));
}

#[test]
fn merged_patches_metadata_fields() {
    let mut spec = CanvasObjectSpec::new("r1", ObjectKind::Rect);
    spec.metadata.role = Some("diagram".into());
    spec.metadata.group_id = Some("g1".into());

    let mut changes = Map::new();
    changes.insert("metadata".into(), json!({"groupId": null, "role": "table"}));
    let merged = spec.merged(&changes).unwrap();
    assert_eq!(merged.role(), Some("table"));
    assert_eq!(merged.metadata.group_id, None);
}

#[test]
fn merged_rejects_invalid_kind() {
    let spec = CanvasObjectSpec::new("r1", ObjectKind::Rect);
    let mut changes = Map::new();
    changes.insert("kind".into(), json!("blob"));
    assert!(matches!(spec.merged(&changes), Err(SpecError::InvalidUpdate(_))));
}

// =============================================================================
// EphemeralObject
// =============================================================================

#[test]
fn stamp_fills_owner_and_default_expiry() {
    let spec = CanvasObjectSpec::new("p1", ObjectKind::PointerPing);
    let obj = EphemeralObject::stamp(spec, "user-1", 1_000).unwrap();
    assert_eq!(obj.owner_id(), Some("user-1"));
    assert_eq!(obj.expires_at(), Some(1_000 + POINTER_PING_TTL_MS));
    assert!(!obj.is_expired(1_000));
    assert!(obj.is_expired(1_000 + POINTER_PING_TTL_MS));
}

#[test]
fn stamp_keeps_client_expiry_and_overrides_owner() {
    let mut spec = CanvasObjectSpec::new("h1", ObjectKind::HighlightStroke);
    spec.metadata.expires_at = Some(5_000);
    spec.metadata.owner_id = Some("spoofed".into());
    let obj = EphemeralObject::stamp(spec, "user-2", 1_000).unwrap();
    assert_eq!(obj.expires_at(), Some(5_000));
    assert_eq!(obj.owner_id(), Some("user-2"));
}

#[test]
fn stamp_question_tag_never_expires() {
    let spec = CanvasObjectSpec::new("q1", ObjectKind::QuestionTag);
    let obj = EphemeralObject::stamp(spec, "u", 0).unwrap();
    assert_eq!(obj.expires_at(), None);
    assert!(!obj.is_expired(i64::MAX));
}

#[test]
fn stamp_rejects_durable_kind_and_blank_id() {
    let rect = CanvasObjectSpec::new("r1", ObjectKind::Rect);
    assert!(matches!(EphemeralObject::stamp(rect, "u", 0), Err(SpecError::NotEphemeral(ObjectKind::Rect))));

    let blank = CanvasObjectSpec::new(" ", ObjectKind::PointerPing);
    assert!(matches!(EphemeralObject::stamp(blank, "u", 0), Err(SpecError::EmptyId)));
}

#[test]
fn ephemeral_serializes_as_plain_spec() {
    let obj = EphemeralObject::stamp(CanvasObjectSpec::new("p1", ObjectKind::PointerPing), "u", 0).unwrap();
    let value = serde_json::to_value(&obj).unwrap();
    assert_eq!(value["id"], "p1");
    assert_eq!(value["kind"], "pointer_ping");
    assert_eq!(value["metadata"]["ownerId"], "u");
    assert_eq!(value["metadata"]["expiresAt"], json!(POINTER_PING_TTL_MS));
}
