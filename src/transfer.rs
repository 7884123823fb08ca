//! `.mtwall` export documents and the import merge.
//!
//! An export carries one image (base64), its dimensions, and every coordinate set with
//! its mark sets reduced to `{name, indices}`. Ids are not exported; importing
//! regenerates them, so documents move between installs without id collisions.
//!
//! Import merges instead of inserting: images are matched by content hash, coordinate
//! sets by coordinate digest and mark sets by name, so importing the same document
//! twice changes nothing the second time.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::app_response::AppResponse;
use crate::content_hash::hash_bytes;
use crate::library_model::{LibraryItem, NewMarkSet, Point};
use crate::library_store::LibraryStore;

pub const EXPORT_VERSION: u64 = 1;
pub const EXPORT_EXTENSION: &str = "mtwall";

const REQUIRED_KEYS: [&str; 6] = [
    "version",
    "imageData",
    "imageFileName",
    "width",
    "height",
    "coordinates",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLibraryItem {
    pub version: u64,
    pub image_file_name: String,
    /// Standard base64 of the raw image bytes.
    pub image_data: String,
    pub width: u32,
    pub height: u32,
    pub coordinates: Vec<ExportedCoordinateSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCoordinateSet {
    pub coords: Vec<Point>,
    #[serde(default)]
    pub saved_mark_sets: Vec<NewMarkSet>,
}

/// Why an import was rejected. The library is unchanged whenever one of these is returned
/// before the image step.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    InvalidFormat(String),
    UnsupportedVersion(JsonValue),
    InvalidImageData(String),
    ImageStore(AppResponse),
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::InvalidFormat(detail) => {
                write!(f, "Invalid or unsupported file format. ({})", detail)
            }
            ImportError::UnsupportedVersion(version) => {
                write!(f, "Invalid or unsupported file format. (version {})", version)
            }
            ImportError::InvalidImageData(detail) => {
                write!(f, "The embedded image could not be decoded: {}", detail)
            }
            ImportError::ImageStore(err) => {
                write!(f, "Failed to process and save the image: {}", err)
            }
        }
    }
}

impl std::error::Error for ImportError {}

impl ImportError {
    /// The `{"error": reason}` document handed back to the UI.
    pub fn to_error_document(&self) -> JsonValue {
        serde_json::json!({ "error": self.to_string() })
    }
}

impl From<ImportError> for AppResponse {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::ImageStore(inner) => inner,
            other => AppResponse::ValidationError(other.to_string()),
        }
    }
}

/// Builds the export document for one library item.
pub fn export_item(store: &LibraryStore, image_id: &str) -> Result<ExportedLibraryItem, AppResponse> {
    let item = store
        .item(image_id)
        .ok_or_else(|| AppResponse::NotFound(format!("No image found with id: {image_id}")))?;
    let bytes = store.image_bytes(item)?;

    Ok(ExportedLibraryItem {
        version: EXPORT_VERSION,
        image_file_name: image_file_name(item),
        image_data: STANDARD.encode(bytes),
        width: item.width,
        height: item.height,
        coordinates: item
            .coordinates
            .iter()
            .map(|set| ExportedCoordinateSet {
                coords: set.coords.clone(),
                saved_mark_sets: set.saved_mark_sets.iter().map(NewMarkSet::from).collect(),
            })
            .collect(),
    })
}

/// File name the image is exported under: last segment of its URI.
pub fn image_file_name(item: &LibraryItem) -> String {
    item.image_uri
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("image.jpg")
        .to_string()
}

/// `<image stem>.mtwall`, or `export.mtwall` when the URI has no usable stem.
pub fn export_file_name(item: &LibraryItem) -> String {
    let file_name = image_file_name(item);
    let stem = file_name.split('.').next().unwrap_or_default();
    let stem = if stem.is_empty() { "export" } else { stem };
    format!("{stem}.{EXPORT_EXTENSION}")
}

/// Writes the export document for `image_id` into `dir` and returns the file path.
pub fn write_export(store: &LibraryStore, image_id: &str, dir: &Path) -> Result<PathBuf, AppResponse> {
    let document = export_item(store, image_id)?;
    let item = store
        .item(image_id)
        .ok_or_else(|| AppResponse::NotFound(format!("No image found with id: {image_id}")))?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(item));
    std::fs::write(&path, serde_json::to_vec(&document)?)?;
    info!("Exported {} to {}", image_id, path.display());
    Ok(path)
}

/// Checks the document envelope before any typed parsing.
fn validate_envelope(document: &JsonValue) -> Result<(), ImportError> {
    let object = document
        .as_object()
        .ok_or_else(|| ImportError::InvalidFormat("document is not an object".to_string()))?;

    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
        return Err(ImportError::InvalidFormat(format!("missing field '{missing}'")));
    }

    let version = &object["version"];
    if version.as_f64() != Some(EXPORT_VERSION as f64) {
        return Err(ImportError::UnsupportedVersion(version.clone()));
    }
    Ok(())
}

/// Merges an export document into the store and returns the target item as it stands
/// after the merge.
pub fn import_document(store: &mut LibraryStore, document: &JsonValue) -> Result<LibraryItem, ImportError> {
    validate_envelope(document)?;
    let exported: ExportedLibraryItem = serde_json::from_value(document.clone())
        .map_err(|e| ImportError::InvalidFormat(e.to_string()))?;

    let bytes = STANDARD
        .decode(exported.image_data.as_bytes())
        .map_err(|e| ImportError::InvalidImageData(e.to_string()))?;

    let existing_id = store
        .item_by_hash(&hash_bytes(&bytes))
        .map(|item| item.id.clone());
    let image_id = match existing_id {
        Some(id) => {
            info!("Import matches existing image {}", id);
            id
        }
        None => store
            .add_image(&bytes, &exported.image_file_name, exported.width, exported.height)
            .map_err(ImportError::ImageStore)?
            .id,
    };

    let mut changed = false;
    for entry in exported.coordinates {
        let resolved = match store.insert_coordinates(&image_id, entry.coords) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping coordinate set during import: {e}");
                continue;
            }
        };
        let (set, created) = resolved;
        changed |= created;

        for mark_set in entry.saved_mark_sets {
            match store.insert_mark_set(&image_id, &set.id, mark_set) {
                Ok(outcome) => changed |= outcome.is_saved(),
                Err(e) => warn!("Skipping mark set during import: {e}"),
            }
        }
    }

    if changed {
        store.persist();
    }

    store
        .item(&image_id)
        .cloned()
        .ok_or_else(|| ImportError::ImageStore(AppResponse::NotFound(image_id)))
}

/// Parses `json` and imports it. Unparseable text is an invalid format.
pub fn import_json(store: &mut LibraryStore, json: &str) -> Result<LibraryItem, ImportError> {
    let document: JsonValue =
        serde_json::from_str(json).map_err(|e| ImportError::InvalidFormat(e.to_string()))?;
    import_document(store, &document)
}

/// Reads an `.mtwall` file and imports it.
pub fn import_file(store: &mut LibraryStore, path: &Path) -> Result<LibraryItem, ImportError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| ImportError::ImageStore(AppResponse::from(e)))?;
    import_json(store, &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_uri(uri: &str) -> LibraryItem {
        LibraryItem {
            id: uri.to_string(),
            image_uri: uri.to_string(),
            original_uri: String::new(),
            content_hash: String::new(),
            width: 1,
            height: 1,
            coordinates: Vec::new(),
        }
    }

    #[test]
    fn test_export_file_names() {
        let item = item_with_uri("/data/images/boulder.wall.jpg");
        assert_eq!(image_file_name(&item), "boulder.wall.jpg");
        assert_eq!(export_file_name(&item), "boulder.mtwall");

        let bare = item_with_uri("/data/images/");
        assert_eq!(image_file_name(&bare), "image.jpg");
        assert_eq!(export_file_name(&item_with_uri(".hidden")), "export.mtwall");
    }

    #[test]
    fn test_envelope_requires_every_key() {
        let doc = serde_json::json!({
            "version": 1, "imageData": "", "imageFileName": "a.jpg",
            "width": 1, "height": 1
        });
        assert!(matches!(
            validate_envelope(&doc),
            Err(ImportError::InvalidFormat(msg)) if msg.contains("coordinates")
        ));
        assert!(validate_envelope(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_envelope_version_must_be_one() {
        let mut doc = serde_json::json!({
            "version": 2, "imageData": "", "imageFileName": "a.jpg",
            "width": 1, "height": 1, "coordinates": []
        });
        assert!(matches!(
            validate_envelope(&doc),
            Err(ImportError::UnsupportedVersion(_))
        ));
        doc["version"] = serde_json::json!("1");
        assert!(validate_envelope(&doc).is_err());
        doc["version"] = serde_json::json!(1);
        assert!(validate_envelope(&doc).is_ok());
        doc["version"] = serde_json::json!(1.0);
        assert!(validate_envelope(&doc).is_ok());
        doc["version"] = serde_json::json!(1.5);
        assert!(validate_envelope(&doc).is_err());
    }

    #[test]
    fn test_error_document_shape() {
        let err = ImportError::InvalidFormat("missing field 'width'".to_string());
        let doc = err.to_error_document();
        assert!(doc["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid or unsupported file format."));
        assert!(matches!(AppResponse::from(err), AppResponse::ValidationError(_)));
    }
}
