//! Object model: what a canvas object looks like in the store and on the wire.
//!
//! A canvas object is a `type` tag plus an open record of fields. The record
//! has one typed core field (`id`) and an explicit extension map holding
//! everything else verbatim, so geometry, style, and per-type content written
//! by any client round-trip through merge and serialization untouched.
//! [`CanvasObjectData`] also carries typed read accessors for the common keys
//! the drawing surface uses, in the spirit of a props accessor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable object identifier, unique within a room.
pub type ObjectId = String;

/// Partial field map used by `setFields` and by captured history state.
///
/// A `null` value means "field absent": merging it removes the key.
pub type FieldMap = Map<String, Value>;

/// Key holding the object identifier inside `data`.
pub const ID_FIELD: &str = "id";

/// Generate a fresh collision-resistant object identifier.
#[must_use]
pub fn new_object_id() -> ObjectId {
    Uuid::new_v4().to_string()
}

/// The open-ended field record of a canvas object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObjectData {
    /// Assigned at creation, never reassigned.
    pub id: ObjectId,
    /// Every other field, preserved verbatim.
    #[serde(flatten)]
    pub fields: FieldMap,
}

/// A canvas object: opaque type tag plus field record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObjectContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: CanvasObjectData,
}

impl CanvasObjectContent {
    /// Build an object from a type tag, id, and initial fields.
    ///
    /// An `id` key inside `fields` is dropped; `id` always wins.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<ObjectId>, mut fields: FieldMap) -> Self {
        fields.remove(ID_FIELD);
        Self { kind: kind.into(), data: CanvasObjectData { id: id.into(), fields } }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.data.id
    }
}

impl CanvasObjectData {
    /// Look up a field by name. `id` resolves to the core identifier.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(key).cloned()
    }

    /// Merge a partial field map into this record.
    ///
    /// Present keys overwrite, `null` removes, and `id` is never touched.
    pub fn merge(&mut self, partial: &FieldMap) {
        for (key, value) in partial {
            if key == ID_FIELD {
                continue;
            }
            if value.is_null() {
                self.fields.remove(key);
            } else {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Capture the current value of `keys`, using `null` for absent fields.
    #[must_use]
    pub fn capture<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> FieldMap {
        keys.into_iter()
            .filter(|key| key.as_str() != ID_FIELD)
            .map(|key| (key.clone(), self.fields.get(key).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    fn string(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Left edge in world coordinates.
    #[must_use]
    pub fn left(&self) -> Option<f64> {
        self.number("left")
    }

    /// Top edge in world coordinates.
    #[must_use]
    pub fn top(&self) -> Option<f64> {
        self.number("top")
    }

    #[must_use]
    pub fn width(&self) -> Option<f64> {
        self.number("width")
    }

    #[must_use]
    pub fn height(&self) -> Option<f64> {
        self.number("height")
    }

    /// Horizontal scale factor. Defaults to `1.0` when absent.
    #[must_use]
    pub fn scale_x(&self) -> f64 {
        self.number("scaleX").unwrap_or(1.0)
    }

    /// Vertical scale factor. Defaults to `1.0` when absent.
    #[must_use]
    pub fn scale_y(&self) -> f64 {
        self.number("scaleY").unwrap_or(1.0)
    }

    /// Clockwise rotation in degrees. Defaults to `0.0` when absent.
    #[must_use]
    pub fn angle(&self) -> f64 {
        self.number("angle").unwrap_or(0.0)
    }

    #[must_use]
    pub fn fill(&self) -> Option<&str> {
        self.string("fill")
    }

    #[must_use]
    pub fn stroke(&self) -> Option<&str> {
        self.string("stroke")
    }

    /// Text content for text objects. Empty string when absent.
    #[must_use]
    pub fn text(&self) -> &str {
        self.string("text").unwrap_or("")
    }

    #[must_use]
    pub fn font_size(&self) -> Option<f64> {
        self.number("fontSize")
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
