//! # mtwall_core
//!
//! Native core of the "Memorize That Wall" memory-training game. The mobile UI links this
//! library and drives it over a C-compatible FFI; Rust callers use the typed API directly.
//!
//! ## What lives here
//!
//! - **Image library** ([`library_store::LibraryStore`]): images deduplicated by SHA-256 of
//!   their bytes, coordinate layouts deduplicated by digest, and named mark sets. The whole
//!   library is persisted as one JSON document in LMDB after every change.
//! - **Import / export** ([`transfer`]): portable `.mtwall` documents that merge into an
//!   existing library without creating duplicates.
//! - **Game session** ([`game_session::GameSession`]): the setup → memorize → guess →
//!   result state machine, plus the two authoring modes.
//!
//! ## Quick Start
//!
//! ```
//! use mtwall_core::library_model::{NewMarkSet, Point};
//! use mtwall_core::library_store::LibraryStore;
//!
//! let mut store = LibraryStore::in_memory();
//! let item = store.add_image(b"jpeg bytes", "wall.jpg", 1200, 800)?;
//! let coords = (0..10).map(|i| Point::new(i as f64 * 100.0, 400.0)).collect();
//! let set = store.add_coordinates(&item.id, coords)?.expect("image exists");
//!
//! let outcome = store.add_saved_mark_set(&item.id, &set.id, NewMarkSet::new("Warm-up", vec![0, 4, 9]))?;
//! assert!(outcome.is_saved());
//! # Ok::<(), mtwall_core::app_response::AppResponse>(())
//! ```
//!
//! ## FFI Functions
//!
//! Every function returns a heap-allocated, null-terminated JSON string holding an
//! [`app_response::AppResponse`]; release it with [`free_response`].
//!
//! - [`open_library`] / [`close_library`] - Library handle lifecycle
//! - [`get_library`] / [`get_library_item`] - Reads
//! - [`add_image`], [`add_coordinates`], [`add_saved_mark_set`] - Creation
//! - [`delete_image`], [`delete_coordinates`], [`delete_saved_mark_set`] - Cascading deletes
//! - [`export_library_item`], [`write_library_item_export`] - `.mtwall` export
//! - [`import_library_item`], [`import_library_file`] - `.mtwall` import
//! - [`create_session`], [`session_apply`], [`session_snapshot`], [`destroy_session`] - Game

pub mod app_response;
pub mod content_hash;
pub mod game_action;
pub mod game_session;
pub mod library_config;
pub mod library_model;
pub mod library_storage;
pub mod library_store;
pub mod transfer;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::game_action::{apply_and_capture, SessionAction, SessionSnapshot};
use crate::game_session::GameSession;
use crate::library_config::LibraryConfig;
use crate::library_model::{NewMarkSet, Point};
use crate::library_store::LibraryStore;

/// Opens (or creates) the on-disk library.
///
/// # Parameters
///
/// * `config_json` - Null-terminated JSON: either a [`LibraryConfig`] object or a bare
///   string used as the root directory.
///
/// # Returns
///
/// A pointer to the [`LibraryStore`], or null on failure. Release it with
/// [`close_library`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use mtwall_core::{open_library, close_library};
///
/// let config = CString::new(r#"{"root_dir":"/data/user/0/app/files"}"#).unwrap();
/// let library = open_library(config.as_ptr());
/// assert!(!library.is_null());
/// close_library(library);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn open_library(config_json: *const c_char) -> *mut LibraryStore {
    if config_json.is_null() {
        warn!("Null config pointer passed to open_library");
        return std::ptr::null_mut();
    }

    let config_str = match unsafe { CStr::from_ptr(config_json).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in config parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = match LibraryConfig::from_json(config_str) {
        Ok(config) => config,
        Err(e) => {
            warn!("Invalid library config: {e}");
            return std::ptr::null_mut();
        }
    };

    info!("Opening library at: {}", config.root_dir.display());
    match LibraryStore::open_with_config(&config) {
        Ok(store) => Box::into_raw(Box::new(store)),
        Err(e) => {
            warn!("Failed to open library: {e}");
            warn!("Attempted path: {}", config.lmdb_dir().display());
            std::ptr::null_mut()
        }
    }
}

/// Releases a library handle returned by [`open_library`]. The pointer must not be used
/// afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_library(state: *mut LibraryStore) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_library".to_string());
        return response_to_c_string(&error);
    }
    drop(unsafe { Box::from_raw(state) });
    response_to_c_string(&AppResponse::success("Library closed successfully"))
}

/// Returns every library item as a JSON array.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_library(state: *mut LibraryStore) -> *const c_char {
    let state = match store_ref(state, "get_library") {
        Ok(s) => s,
        Err(err) => return err,
    };
    respond(Ok(state.items()))
}

/// Returns one library item by id, or `NotFound`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_library_item(state: *mut LibraryStore, image_id: *const c_char) -> *const c_char {
    let state = match store_ref(state, "get_library_item") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(image_id, "image_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    respond(
        state
            .item(&id)
            .ok_or_else(|| AppResponse::NotFound(format!("No image found with id: {id}"))),
    )
}

/// Copies the image file at `source_path` into the library.
///
/// Byte-identical images resolve to the existing item; the response is that item.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_image(
    state: *mut LibraryStore,
    source_path: *const c_char,
    width: u32,
    height: u32,
) -> *const c_char {
    let state = match store_mut(state, "add_image") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let path = match c_ptr_to_string(source_path, "source_path") {
        Ok(path) => path,
        Err(err) => return err,
    };
    respond(state.add_image_file(Path::new(&path), width, height))
}

/// Adds a coordinate set. `coords_json` is an array of `{"x":..,"y":..}` in image pixels.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_coordinates(
    state: *mut LibraryStore,
    image_id: *const c_char,
    coords_json: *const c_char,
) -> *const c_char {
    let state = match store_mut(state, "add_coordinates") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(image_id, "image_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let coords: Vec<Point> = match parse_json(coords_json, "coords") {
        Ok(coords) => coords,
        Err(err) => return err,
    };

    let result = state.add_coordinates(&id, coords).and_then(|set| {
        set.ok_or_else(|| AppResponse::NotFound(format!("No image found with id: {id}")))
    });
    respond(result)
}

/// Saves a mark set. `mark_set_json` is `{"name":..,"indices":[..]}`.
///
/// The `Ok` payload is a [`library_model::MarkSetOutcome`], so a skipped duplicate name
/// is visible to the caller.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_saved_mark_set(
    state: *mut LibraryStore,
    image_id: *const c_char,
    coords_id: *const c_char,
    mark_set_json: *const c_char,
) -> *const c_char {
    let state = match store_mut(state, "add_saved_mark_set") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let (image_id, coords_id) = match (
        c_ptr_to_string(image_id, "image_id"),
        c_ptr_to_string(coords_id, "coords_id"),
    ) {
        (Ok(image_id), Ok(coords_id)) => (image_id, coords_id),
        (Err(err), _) | (_, Err(err)) => return err,
    };
    let mark_set: NewMarkSet = match parse_json(mark_set_json, "mark set") {
        Ok(mark_set) => mark_set,
        Err(err) => return err,
    };
    respond(state.add_saved_mark_set(&image_id, &coords_id, mark_set))
}

/// Deletes an image and everything under it. `Ok(false)` if it did not exist.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_image(state: *mut LibraryStore, image_id: *const c_char) -> *const c_char {
    let state = match store_mut(state, "delete_image") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(image_id, "image_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    respond(state.delete_image(&id))
}

/// Deletes a coordinate set and its mark sets. `Ok(false)` if it did not exist.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_coordinates(
    state: *mut LibraryStore,
    image_id: *const c_char,
    coords_id: *const c_char,
) -> *const c_char {
    let state = match store_mut(state, "delete_coordinates") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let (image_id, coords_id) = match (
        c_ptr_to_string(image_id, "image_id"),
        c_ptr_to_string(coords_id, "coords_id"),
    ) {
        (Ok(image_id), Ok(coords_id)) => (image_id, coords_id),
        (Err(err), _) | (_, Err(err)) => return err,
    };
    respond(Ok(state.delete_coordinates(&image_id, &coords_id)))
}

/// Deletes one saved mark set. `Ok(false)` if it did not exist.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_saved_mark_set(
    state: *mut LibraryStore,
    image_id: *const c_char,
    coords_id: *const c_char,
    set_id: *const c_char,
) -> *const c_char {
    let state = match store_mut(state, "delete_saved_mark_set") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let ids = (
        c_ptr_to_string(image_id, "image_id"),
        c_ptr_to_string(coords_id, "coords_id"),
        c_ptr_to_string(set_id, "set_id"),
    );
    let (image_id, coords_id, set_id) = match ids {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => return err,
    };
    respond(Ok(state.delete_saved_mark_set(&image_id, &coords_id, &set_id)))
}

/// Returns the `.mtwall` export document for one image.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn export_library_item(state: *mut LibraryStore, image_id: *const c_char) -> *const c_char {
    let state = match store_ref(state, "export_library_item") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let id = match c_ptr_to_string(image_id, "image_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    respond(state.export_library_item(&id))
}

/// Writes the `.mtwall` export for one image into `dir`; the `Ok` payload is the file path.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn write_library_item_export(
    state: *mut LibraryStore,
    image_id: *const c_char,
    dir: *const c_char,
) -> *const c_char {
    let state = match store_ref(state, "write_library_item_export") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let (id, dir) = match (c_ptr_to_string(image_id, "image_id"), c_ptr_to_string(dir, "dir")) {
        (Ok(id), Ok(dir)) => (id, dir),
        (Err(err), _) | (_, Err(err)) => return err,
    };
    respond(
        transfer::write_export(state, &id, Path::new(&dir))
            .map(|path| path.to_string_lossy().into_owned()),
    )
}

/// Merges a `.mtwall` document (given as JSON text) into the library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn import_library_item(state: *mut LibraryStore, document_json: *const c_char) -> *const c_char {
    let state = match store_mut(state, "import_library_item") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let json = match c_ptr_to_string(document_json, "document") {
        Ok(json) => json,
        Err(err) => return err,
    };
    respond(transfer::import_json(state, &json).map_err(AppResponse::from))
}

/// Reads and merges a `.mtwall` file into the library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn import_library_file(state: *mut LibraryStore, path: *const c_char) -> *const c_char {
    let state = match store_mut(state, "import_library_file") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let path = match c_ptr_to_string(path, "path") {
        Ok(path) => path,
        Err(err) => return err,
    };
    respond(transfer::import_file(state, Path::new(&path)).map_err(AppResponse::from))
}

/// Creates a game session in the setup phase. Release it with [`destroy_session`].
#[no_mangle]
pub extern "C" fn create_session() -> *mut GameSession {
    Box::into_raw(Box::new(GameSession::new()))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn destroy_session(session: *mut GameSession) -> *const c_char {
    if session.is_null() {
        let error = AppResponse::BadRequest("Null session pointer passed to destroy_session".to_string());
        return response_to_c_string(&error);
    }
    drop(unsafe { Box::from_raw(session) });
    response_to_c_string(&AppResponse::success("Session destroyed"))
}

/// Applies one [`SessionAction`] (JSON) and returns `{outcome, snapshot}`.
///
/// Guard conditions such as "no guesses yet" come back as `ValidationError` with a
/// message meant for the user.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn session_apply(
    session: *mut GameSession,
    state: *mut LibraryStore,
    action_json: *const c_char,
) -> *const c_char {
    let session = match unsafe { session.as_mut() } {
        Some(s) => s,
        None => {
            let error = AppResponse::BadRequest("Null session pointer passed to session_apply".to_string());
            return response_to_c_string(&error);
        }
    };
    let state = match store_mut(state, "session_apply") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let action: SessionAction = match parse_json(action_json, "action") {
        Ok(action) => action,
        Err(err) => return err,
    };

    let mut rng = rand::thread_rng();
    respond(apply_and_capture(session, state, action, &mut rng).map_err(AppResponse::from))
}

/// Returns the current [`SessionSnapshot`] without changing anything.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn session_snapshot(session: *mut GameSession, state: *mut LibraryStore) -> *const c_char {
    let session = match unsafe { session.as_ref() } {
        Some(s) => s,
        None => {
            let error = AppResponse::BadRequest("Null session pointer passed to session_snapshot".to_string());
            return response_to_c_string(&error);
        }
    };
    let state = match store_ref(state, "session_snapshot") {
        Ok(s) => s,
        Err(err) => return err,
    };
    respond(Ok(SessionSnapshot::capture(session, state)))
}

/// Frees a string returned by any function in this library. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr as *mut c_char) });
}

/// Wraps a result in the response envelope: `Ok` carries the value as JSON text.
fn respond<T: Serialize>(result: Result<T, AppResponse>) -> *const c_char {
    let response = match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(json) => AppResponse::Ok(json),
            Err(e) => AppResponse::SerializationError(format!("Failed to serialize result: {e}")),
        },
        Err(err) => err,
    };
    response_to_c_string(&response)
}

fn store_ref<'a>(state: *mut LibraryStore, caller: &str) -> Result<&'a LibraryStore, *const c_char> {
    match unsafe { state.as_ref() } {
        Some(s) => Ok(s),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn store_mut<'a>(state: *mut LibraryStore, caller: &str) -> Result<&'a mut LibraryStore, *const c_char> {
    match unsafe { state.as_mut() } {
        Some(s) => Ok(s),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(ptr: *const c_char, field_name: &str) -> Result<T, *const c_char> {
    let json = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&json).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid {field_name} JSON: {e}"));
        response_to_c_string(&error)
    })
}

/// Hands an [`AppResponse`] to the host as JSON. The host releases it with
/// [`free_response`]; null means the envelope itself could not be encoded.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Copies a host-owned argument into an owned `String`. On a null or non-UTF-8
/// argument the error is the encoded `BadRequest` naming `field_name`.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
