//! Data model for the image library.
//!
//! The library is a tree: each [`LibraryItem`] is one distinct source image, it owns an
//! ordered list of [`CoordinateSet`]s (marker layouts over that image), and each
//! coordinate set owns the [`SavedMarkSet`]s that were saved against it. There are no
//! back-references; deleting a node drops its whole subtree.
//!
//! All types serialize with camelCase field names, which is the shape of the persisted
//! library document:
//!
//! ```json
//! [ { "id": "...", "imageUri": "...", "originalUri": "...", "contentHash": "...",
//!     "width": 1200, "height": 800,
//!     "coordinates": [ { "id": "...", "coords": [{"x": 1.0, "y": 2.0}],
//!                        "savedMarkSets": [{"id": "...", "name": "...", "indices": [0, 1]}] } ] } ]
//! ```

use serde::{Deserialize, Serialize};

/// Longest accepted mark set name, in characters.
pub const MAX_MARK_SET_NAME_LEN: usize = 50;

/// A marker position in original-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One distinct source image and everything authored on top of it.
///
/// # Structure
///
/// - **id**: Stable handle for the item. It is the storage location returned by the
///   image store, so it doubles as `image_uri`.
/// - **content_hash**: SHA-256 of the raw image bytes. Unique across the library; two
///   uploads of byte-identical images resolve to the same item.
/// - **width / height**: Natural pixel dimensions, fixed at creation.
/// - **coordinates**: Append-only (except for explicit deletion) list of layouts.
///
/// # Examples
///
/// ```rust
/// use mtwall_core::library_model::LibraryItem;
///
/// let item = LibraryItem {
///     id: "images/wall.jpg".to_string(),
///     image_uri: "images/wall.jpg".to_string(),
///     original_uri: "/picker/cache/wall.jpg".to_string(),
///     content_hash: "e3b0c442".to_string(),
///     width: 1200,
///     height: 800,
///     coordinates: Vec::new(),
/// };
///
/// let json = serde_json::to_string(&item)?;
/// assert!(json.contains("\"imageUri\""));
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub id: String,
    pub image_uri: String,
    /// Where the image came from (picker path, import file name). Informational only.
    pub original_uri: String,
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub coordinates: Vec<CoordinateSet>,
}

impl LibraryItem {
    pub fn coordinate_set(&self, coords_id: &str) -> Option<&CoordinateSet> {
        self.coordinates.iter().find(|set| set.id == coords_id)
    }

    pub fn coordinate_set_mut(&mut self, coords_id: &str) -> Option<&mut CoordinateSet> {
        self.coordinates.iter_mut().find(|set| set.id == coords_id)
    }

    /// Total number of saved mark sets across every coordinate set of this image.
    pub fn mark_set_count(&self) -> usize {
        self.coordinates.iter().map(|set| set.saved_mark_sets.len()).sum()
    }
}

/// An immutable marker layout over one image.
///
/// `id` is the digest of the canonical JSON of `coords`, so identical layouts collide
/// on purpose: that collision is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateSet {
    pub id: String,
    pub coords: Vec<Point>,
    #[serde(default)]
    pub saved_mark_sets: Vec<SavedMarkSet>,
}

impl CoordinateSet {
    pub fn mark_set(&self, set_id: &str) -> Option<&SavedMarkSet> {
        self.saved_mark_sets.iter().find(|set| set.id == set_id)
    }

    pub fn has_mark_set_named(&self, name: &str) -> bool {
        self.saved_mark_sets.iter().any(|set| set.name == name)
    }
}

/// A named subset of a coordinate set's indices; one replayable challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMarkSet {
    pub id: String,
    pub name: String,
    pub indices: Vec<usize>,
}

/// Caller-supplied mark set payload. Also the exported form, since ids are never
/// carried across installs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarkSet {
    pub name: String,
    pub indices: Vec<usize>,
}

impl NewMarkSet {
    pub fn new(name: impl Into<String>, indices: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            indices,
        }
    }
}

impl From<&SavedMarkSet> for NewMarkSet {
    fn from(set: &SavedMarkSet) -> Self {
        Self {
            name: set.name.clone(),
            indices: set.indices.clone(),
        }
    }
}

/// What happened to a mark set insertion.
///
/// A name collision is a silent skip (first write wins), but callers can see it here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "markSet", rename_all = "snake_case")]
pub enum MarkSetOutcome {
    Saved(SavedMarkSet),
    DuplicateName,
    CoordinatesNotFound,
}

impl MarkSetOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, MarkSetOutcome::Saved(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_shape_uses_camel_case() {
        let set = CoordinateSet {
            id: "abc".to_string(),
            coords: vec![Point::new(1.0, 2.5)],
            saved_mark_sets: vec![SavedMarkSet {
                id: "m1".to_string(),
                name: "Set of 2 (1)".to_string(),
                indices: vec![0],
            }],
        };
        let value = serde_json::to_value(&set).unwrap();
        assert!(value.get("savedMarkSets").is_some());
        assert_eq!(value["coords"][0]["y"], serde_json::json!(2.5));
    }

    #[test]
    fn test_missing_children_default_to_empty() {
        let item: LibraryItem = serde_json::from_str(
            r#"{"id":"a","imageUri":"a","originalUri":"o","contentHash":"h","width":1,"height":2}"#,
        )
        .unwrap();
        assert!(item.coordinates.is_empty());
        assert_eq!(item.mark_set_count(), 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&MarkSetOutcome::DuplicateName).unwrap();
        assert_eq!(json, r#"{"status":"duplicate_name"}"#);
    }
}
