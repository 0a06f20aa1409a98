#![allow(clippy::float_cmp)]

use serde_json::json;

use super::*;

fn fields(value: Value) -> FieldMap {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn content_serializes_with_type_tag_and_flat_data() {
    let obj = CanvasObjectContent::new("rectangle", "o1", fields(json!({"left": 10, "top": 10})));
    let value = serde_json::to_value(&obj).unwrap();
    assert_eq!(value, json!({"type": "rectangle", "data": {"id": "o1", "left": 10, "top": 10}}));
}

#[test]
fn unknown_fields_round_trip_unchanged() {
    let raw = json!({
        "type": "freehand-path",
        "data": {
            "id": "p1",
            "path": [["M", 0, 0], ["L", 4, 5]],
            "customVendorField": {"nested": true},
            "strokeDashArray": null
        }
    });
    let obj: CanvasObjectContent = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(obj.kind, "freehand-path");
    assert_eq!(obj.id(), "p1");
    assert_eq!(serde_json::to_value(&obj).unwrap(), raw);
}

#[test]
fn missing_id_is_rejected() {
    let raw = json!({"type": "text", "data": {"text": "hello"}});
    assert!(serde_json::from_value::<CanvasObjectContent>(raw).is_err());
}

#[test]
fn new_drops_id_from_fields() {
    let obj = CanvasObjectContent::new("text", "t1", fields(json!({"id": "other", "text": "hi"})));
    assert_eq!(obj.id(), "t1");
    assert!(!obj.data.fields.contains_key("id"));
}

#[test]
fn merge_overwrites_adds_and_removes() {
    let mut data = CanvasObjectContent::new("rectangle", "o1", fields(json!({"left": 10, "fill": "red"}))).data;
    data.merge(&fields(json!({"left": 50, "top": 3, "fill": null})));
    assert_eq!(data.fields, fields(json!({"left": 50, "top": 3})));
}

#[test]
fn merge_never_reassigns_id() {
    let mut data = CanvasObjectContent::new("rectangle", "o1", FieldMap::new()).data;
    data.merge(&fields(json!({"id": "hijack"})));
    assert_eq!(data.id, "o1");
    assert!(data.fields.is_empty());
}

#[test]
fn capture_uses_null_for_absent_fields() {
    let data = CanvasObjectContent::new("rectangle", "o1", fields(json!({"left": 10}))).data;
    let keys = ["left".to_string(), "top".to_string(), "id".to_string()];
    let captured = data.capture(keys.iter());
    assert_eq!(captured, fields(json!({"left": 10, "top": null})));
}

#[test]
fn typed_accessors_read_common_fields() {
    let data = CanvasObjectContent::new(
        "text",
        "t1",
        fields(json!({
            "left": 1.5, "top": 2, "width": 30, "height": 40,
            "scaleX": 2, "angle": 45, "fill": "#fff", "text": "hello", "fontSize": 18
        })),
    )
    .data;
    assert_eq!(data.left(), Some(1.5));
    assert_eq!(data.top(), Some(2.0));
    assert_eq!(data.width(), Some(30.0));
    assert_eq!(data.height(), Some(40.0));
    assert!((data.scale_x() - 2.0).abs() < f64::EPSILON);
    assert!((data.scale_y() - 1.0).abs() < f64::EPSILON);
    assert!((data.angle() - 45.0).abs() < f64::EPSILON);
    assert_eq!(data.fill(), Some("#fff"));
    assert_eq!(data.stroke(), None);
    assert_eq!(data.text(), "hello");
    assert_eq!(data.font_size(), Some(18.0));
}

#[test]
fn get_resolves_id_and_fields() {
    let data = CanvasObjectContent::new("rectangle", "o1", fields(json!({"left": 10}))).data;
    assert_eq!(data.get("id"), Some(json!("o1")));
    assert_eq!(data.get("left"), Some(json!(10)));
    assert_eq!(data.get("top"), None);
}

#[test]
fn new_object_ids_are_unique() {
    assert_ne!(new_object_id(), new_object_id());
}
