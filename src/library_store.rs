//! The image library: system of record for images, coordinate sets and mark sets.
//!
//! All reads are served from the in-memory collection. Every successful mutation is
//! followed by a write of the whole collection through the [`LibraryPersistence`]
//! port; a failed write is logged and the in-memory state stands.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::content_hash::{hash_bytes, hash_coordinates};
use crate::library_config::LibraryConfig;
use crate::library_model::{
    CoordinateSet, LibraryItem, MarkSetOutcome, NewMarkSet, Point, SavedMarkSet,
    MAX_MARK_SET_NAME_LEN,
};
use crate::library_storage::{
    FsImageStore, ImageStore, LibraryPersistence, LmdbPersistence, MemoryImageStore,
    MemoryPersistence,
};
use crate::transfer::{self, ExportedLibraryItem, ImportError};

pub struct LibraryStore {
    items: Vec<LibraryItem>,
    persistence: Box<dyn LibraryPersistence>,
    images: Box<dyn ImageStore>,
}

impl LibraryStore {
    /// Loads the library from `persistence`.
    ///
    /// Never fails: a missing document yields an empty library, and an unreadable or
    /// corrupt one is logged and also yields an empty library.
    pub fn open(persistence: Box<dyn LibraryPersistence>, images: Box<dyn ImageStore>) -> Self {
        let items = match persistence.read_all() {
            Ok(Some(blob)) => match serde_json::from_slice::<Vec<LibraryItem>>(&blob) {
                Ok(items) => {
                    info!("Library loaded with {} images", items.len());
                    items
                }
                Err(e) => {
                    warn!("Failed to parse stored library, starting empty: {e}");
                    Vec::new()
                }
            },
            Ok(None) => {
                info!("No stored library found, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to load library from storage, starting empty: {e}");
                Vec::new()
            }
        };

        Self {
            items,
            persistence,
            images,
        }
    }

    /// Opens the on-disk library described by `config` (LMDB document + image folder).
    pub fn open_with_config(config: &LibraryConfig) -> Result<Self, AppResponse> {
        config.validate()?;
        let persistence = LmdbPersistence::from_config(config)?;
        let images = FsImageStore::open(config.images_path())?;
        Ok(Self::open(Box::new(persistence), Box::new(images)))
    }

    /// A fresh library with no backing storage.
    pub fn in_memory() -> Self {
        Self::open(
            Box::new(MemoryPersistence::new()),
            Box::new(MemoryImageStore::new()),
        )
    }

    pub fn items(&self) -> &[LibraryItem] {
        &self.items
    }

    pub fn item(&self, image_id: &str) -> Option<&LibraryItem> {
        self.items.iter().find(|item| item.id == image_id)
    }

    pub fn item_by_hash(&self, content_hash: &str) -> Option<&LibraryItem> {
        self.items.iter().find(|item| item.content_hash == content_hash)
    }

    pub fn coordinate_set(&self, image_id: &str, coords_id: &str) -> Option<&CoordinateSet> {
        self.item(image_id)?.coordinate_set(coords_id)
    }

    /// Names of every mark set saved against one coordinate set (empty if not found).
    pub fn mark_set_names(&self, image_id: &str, coords_id: &str) -> Vec<String> {
        self.coordinate_set(image_id, coords_id)
            .map(|set| set.saved_mark_sets.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn image_bytes(&self, item: &LibraryItem) -> Result<Vec<u8>, AppResponse> {
        self.images.load(&item.image_uri)
    }

    /// Adds an image, deduplicated by content hash.
    ///
    /// If an item with the same hash exists it is returned unchanged and nothing is
    /// stored. Otherwise the bytes are written to the image store and a new item with
    /// no coordinate sets is appended.
    pub fn add_image(
        &mut self,
        bytes: &[u8],
        original_uri: &str,
        width: u32,
        height: u32,
    ) -> Result<LibraryItem, AppResponse> {
        let content_hash = hash_bytes(bytes);
        if let Some(existing) = self.item_by_hash(&content_hash) {
            info!("Duplicate image detected, returning existing item {}", existing.id);
            return Ok(existing.clone());
        }

        if width == 0 || height == 0 {
            return Err(AppResponse::ValidationError(format!(
                "Image dimensions must be positive, got {width}x{height}"
            )));
        }

        let file_name = file_name_for(original_uri);
        let image_uri = self.images.store(&file_name, bytes)?;

        let item = LibraryItem {
            id: image_uri.clone(),
            image_uri,
            original_uri: original_uri.to_string(),
            content_hash,
            width,
            height,
            coordinates: Vec::new(),
        };
        info!("Added image {} ({}x{})", item.id, width, height);
        self.items.push(item.clone());
        self.persist();
        Ok(item)
    }

    /// Reads an image file from disk and adds it. See [`LibraryStore::add_image`].
    pub fn add_image_file(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<LibraryItem, AppResponse> {
        let bytes = std::fs::read(path)?;
        self.add_image(&bytes, &path.to_string_lossy(), width, height)
    }

    /// Adds a coordinate layout to an image, deduplicated by coordinate digest.
    ///
    /// Returns `Ok(None)` when the image does not exist.
    pub fn add_coordinates(
        &mut self,
        image_id: &str,
        coords: Vec<Point>,
    ) -> Result<Option<CoordinateSet>, AppResponse> {
        let result = self.insert_coordinates(image_id, coords)?;
        if let Some((_, true)) = &result {
            self.persist();
        }
        Ok(result.map(|(set, _)| set))
    }

    /// Saves a named mark set against a coordinate set.
    ///
    /// A name that is already taken under that coordinate set is skipped
    /// (first write wins) and reported as [`MarkSetOutcome::DuplicateName`].
    pub fn add_saved_mark_set(
        &mut self,
        image_id: &str,
        coords_id: &str,
        mark_set: NewMarkSet,
    ) -> Result<MarkSetOutcome, AppResponse> {
        let outcome = self.insert_mark_set(image_id, coords_id, mark_set)?;
        if outcome.is_saved() {
            self.persist();
        }
        Ok(outcome)
    }

    /// Deletes an image, its stored bytes and everything authored on it.
    ///
    /// Returns `Ok(false)` if no such image exists. If the bytes cannot be removed the
    /// library is left untouched.
    pub fn delete_image(&mut self, image_id: &str) -> Result<bool, AppResponse> {
        let Some(position) = self.items.iter().position(|item| item.id == image_id) else {
            return Ok(false);
        };

        self.images.remove(&self.items[position].image_uri)?;
        let removed = self.items.remove(position);
        info!(
            "Deleted image {} with {} coordinate sets and {} mark sets",
            removed.id,
            removed.coordinates.len(),
            removed.mark_set_count()
        );
        self.persist();
        Ok(true)
    }

    pub fn delete_coordinates(&mut self, image_id: &str, coords_id: &str) -> bool {
        let Some(item) = self.item_mut(image_id) else {
            return false;
        };
        let before = item.coordinates.len();
        item.coordinates.retain(|set| set.id != coords_id);
        let removed = item.coordinates.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    pub fn delete_saved_mark_set(&mut self, image_id: &str, coords_id: &str, set_id: &str) -> bool {
        let Some(set) = self
            .item_mut(image_id)
            .and_then(|item| item.coordinate_set_mut(coords_id))
        else {
            return false;
        };
        let before = set.saved_mark_sets.len();
        set.saved_mark_sets.retain(|mark_set| mark_set.id != set_id);
        let removed = set.saved_mark_sets.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    /// Merges an exported `.mtwall` document into the library.
    pub fn import_library_item(&mut self, document: &JsonValue) -> Result<LibraryItem, ImportError> {
        transfer::import_document(self, document)
    }

    pub fn export_library_item(&self, image_id: &str) -> Result<ExportedLibraryItem, AppResponse> {
        transfer::export_item(self, image_id)
    }

    /// Writes the whole collection back to persistence. Failures are logged only.
    pub(crate) fn persist(&self) {
        let blob = match serde_json::to_vec(&self.items) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to serialize library: {e}");
                return;
            }
        };
        if let Err(e) = self.persistence.write_all(&blob) {
            warn!("Failed to save library to storage: {e}");
        }
    }

    fn item_mut(&mut self, image_id: &str) -> Option<&mut LibraryItem> {
        self.items.iter_mut().find(|item| item.id == image_id)
    }

    /// Inserts without persisting. Returns the set and whether it was newly created.
    pub(crate) fn insert_coordinates(
        &mut self,
        image_id: &str,
        coords: Vec<Point>,
    ) -> Result<Option<(CoordinateSet, bool)>, AppResponse> {
        let coords_id = hash_coordinates(&coords)?;
        let Some(item) = self.item_mut(image_id) else {
            return Ok(None);
        };

        if let Some(existing) = item.coordinate_set(&coords_id) {
            info!("Coordinate set {} already exists on {}", coords_id, image_id);
            return Ok(Some((existing.clone(), false)));
        }

        let set = CoordinateSet {
            id: coords_id,
            coords,
            saved_mark_sets: Vec::new(),
        };
        item.coordinates.push(set.clone());
        Ok(Some((set, true)))
    }

    /// Inserts without persisting.
    pub(crate) fn insert_mark_set(
        &mut self,
        image_id: &str,
        coords_id: &str,
        mark_set: NewMarkSet,
    ) -> Result<MarkSetOutcome, AppResponse> {
        let Some(set) = self
            .item_mut(image_id)
            .and_then(|item| item.coordinate_set_mut(coords_id))
        else {
            return Ok(MarkSetOutcome::CoordinatesNotFound);
        };

        let indices = validate_mark_set(&mark_set, set.coords.len())?;
        if set.has_mark_set_named(&mark_set.name) {
            info!("Mark set '{}' already exists, skipping", mark_set.name);
            return Ok(MarkSetOutcome::DuplicateName);
        }

        let saved = SavedMarkSet {
            id: Uuid::new_v4().to_string(),
            name: mark_set.name,
            indices,
        };
        set.saved_mark_sets.push(saved.clone());
        Ok(MarkSetOutcome::Saved(saved))
    }
}

/// Checks name and indices; returns the indices with duplicates dropped.
fn validate_mark_set(mark_set: &NewMarkSet, point_count: usize) -> Result<Vec<usize>, AppResponse> {
    let name_len = mark_set.name.chars().count();
    if mark_set.name.trim().is_empty() {
        return Err(AppResponse::ValidationError(
            "Mark set name cannot be empty".to_string(),
        ));
    }
    if name_len > MAX_MARK_SET_NAME_LEN {
        return Err(AppResponse::ValidationError(format!(
            "Mark set name is {name_len} characters, the limit is {MAX_MARK_SET_NAME_LEN}"
        )));
    }
    if mark_set.indices.is_empty() {
        return Err(AppResponse::ValidationError(
            "Mark set needs at least one index".to_string(),
        ));
    }
    if let Some(bad) = mark_set.indices.iter().find(|&&index| index >= point_count) {
        return Err(AppResponse::ValidationError(format!(
            "Index {bad} is out of range for {point_count} points"
        )));
    }

    let mut indices = Vec::with_capacity(mark_set.indices.len());
    for &index in &mark_set.indices {
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    Ok(indices)
}

/// Last path segment of `uri`, or a timestamped fallback.
fn file_name_for(uri: &str) -> String {
    match uri.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            format!("img_{millis}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<Point> {
        (0..n).map(|i| Point::new(i as f64, i as f64 * 2.0)).collect()
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(file_name_for("file:///cache/ImagePicker/wall.jpg"), "wall.jpg");
        assert!(file_name_for("file:///cache/").starts_with("img_"));
    }

    #[test]
    fn test_validate_mark_set_rules() {
        assert!(validate_mark_set(&NewMarkSet::new("", vec![0]), 3).is_err());
        assert!(validate_mark_set(&NewMarkSet::new("a".repeat(51), vec![0]), 3).is_err());
        assert!(validate_mark_set(&NewMarkSet::new("a".repeat(50), vec![0]), 3).is_ok());
        assert!(validate_mark_set(&NewMarkSet::new("x", vec![]), 3).is_err());
        assert!(validate_mark_set(&NewMarkSet::new("x", vec![3]), 3).is_err());
        assert_eq!(
            validate_mark_set(&NewMarkSet::new("x", vec![2, 0, 2]), 3).unwrap(),
            vec![2, 0]
        );
    }

    #[test]
    fn test_zero_dimensions_rejected_without_mutation() {
        let mut store = LibraryStore::in_memory();
        assert!(matches!(
            store.add_image(b"img", "a.jpg", 0, 10),
            Err(AppResponse::ValidationError(_))
        ));
        assert!(store.items().is_empty());
    }

    #[test]
    fn test_mark_set_on_missing_coordinates() {
        let mut store = LibraryStore::in_memory();
        let item = store.add_image(b"img", "a.jpg", 10, 10).unwrap();
        let outcome = store
            .add_saved_mark_set(&item.id, "nope", NewMarkSet::new("x", vec![0]))
            .unwrap();
        assert_eq!(outcome, MarkSetOutcome::CoordinatesNotFound);
        let set = store.add_coordinates(&item.id, points(4)).unwrap().unwrap();
        assert_eq!(store.mark_set_names(&item.id, &set.id), Vec::<String>::new());
    }
}
