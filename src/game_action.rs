//! JSON-driven commands for a [`GameSession`].
//!
//! The host UI sends one [`SessionAction`] per user event, e.g.
//! `{"type":"toggle_marker","index":3}`, and renders the [`SessionSnapshot`] it gets
//! back. Nothing here holds state of its own.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game_session::{
    default_mark_set_name, pick_random_mark_set, GamePhase, GameSession, MarkerStyle, Score,
    SessionPrompt, Size,
};
use crate::library_model::{CoordinateSet, LibraryItem, MarkSetOutcome, Point};
use crate::library_store::LibraryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionAction {
    LoadForPlay {
        image_id: String,
        coords_id: String,
        #[serde(default)]
        set_id: Option<String>,
    },
    PlayRandomMarkSet {
        image_id: String,
        coords_id: String,
    },
    LoadForMarkSetCreation {
        image_id: String,
        coords_id: String,
    },
    LoadForCoordinateCreation {
        image_id: String,
    },
    StartMemorize,
    Retry,
    BeginGuess,
    ToggleMarker {
        index: usize,
    },
    TapImage {
        x: f64,
        y: f64,
        display_width: f64,
        display_height: f64,
    },
    CheckGuesses,
    SaveCoordinates,
    PrepareMarkSetSave,
    CommitMarkSetSave {
        name: String,
    },
    CancelMarkSetSave,
    Reset,
    Unload,
}

/// Action-specific result, next to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionOutcome {
    Done,
    Changed(bool),
    PointAdded(Option<Point>),
    Score(Score),
    CoordinatesSaved(CoordinateSet),
    DefaultName(String),
    MarkSet(MarkSetOutcome),
}

/// Everything the UI needs to draw the game screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: GamePhase,
    pub image_id: Option<String>,
    pub coords_id: Option<String>,
    pub coords: Vec<Point>,
    pub targets: Vec<usize>,
    pub selected: Vec<usize>,
    pub pending_save: Vec<usize>,
    pub score: Option<Score>,
    pub status_text: String,
    pub markers: Vec<MarkerStyle>,
    /// Name of the saved mark set matching the current targets, if any.
    pub current_mark_set: Option<String>,
    pub is_unsaved_set: bool,
    /// Suggested name for saving the current targets.
    pub suggested_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReply {
    pub outcome: ActionOutcome,
    pub snapshot: SessionSnapshot,
}

impl SessionSnapshot {
    pub fn capture(session: &GameSession, store: &LibraryStore) -> Self {
        let board = session.board();
        let coord_set = board.and_then(|board| {
            let coords_id = board.coords_id.as_deref()?;
            store.coordinate_set(&board.image_id, coords_id)
        });

        let suggested_name = match (board, coord_set) {
            (Some(_), Some(set)) if !session.targets().is_empty() => Some(default_mark_set_name(
                &set.saved_mark_sets.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
                session.targets().len(),
            )),
            _ => None,
        };

        Self {
            phase: session.phase(),
            image_id: board.map(|b| b.image_id.clone()),
            coords_id: board.and_then(|b| b.coords_id.clone()),
            coords: board.map(|b| b.coords.clone()).unwrap_or_default(),
            targets: session.targets().to_vec(),
            selected: session.selected().iter().copied().collect(),
            pending_save: session.pending_save().to_vec(),
            score: session.score(),
            status_text: session.status_text(),
            markers: session.marker_styles(),
            current_mark_set: coord_set
                .and_then(|set| session.matching_mark_set(set))
                .map(|m| m.name.clone()),
            is_unsaved_set: coord_set.is_some_and(|set| session.is_unsaved_set(set)),
            suggested_name,
        }
    }
}

fn lookup<'a>(
    store: &'a LibraryStore,
    image_id: &str,
    coords_id: &str,
) -> Result<(&'a LibraryItem, &'a CoordinateSet), SessionPrompt> {
    let item = store.item(image_id).ok_or(SessionPrompt::WallNotFound)?;
    let set = item.coordinate_set(coords_id).ok_or(SessionPrompt::WallNotFound)?;
    Ok((item, set))
}

/// Runs one action against the session.
pub fn apply_action<R: Rng + ?Sized>(
    session: &mut GameSession,
    store: &mut LibraryStore,
    action: SessionAction,
    rng: &mut R,
) -> Result<ActionOutcome, SessionPrompt> {
    let outcome = match action {
        SessionAction::LoadForPlay {
            image_id,
            coords_id,
            set_id,
        } => {
            let (item, set) = lookup(store, &image_id, &coords_id)?;
            session.load_for_play(item, set, set_id.as_deref(), rng)?;
            ActionOutcome::Done
        }
        SessionAction::PlayRandomMarkSet {
            image_id,
            coords_id,
        } => {
            let (item, set) = lookup(store, &image_id, &coords_id)?;
            let set_id = pick_random_mark_set(set, rng)
                .map(|m| m.id.clone())
                .ok_or(SessionPrompt::NoSavedMarkSets)?;
            session.load_for_play(item, set, Some(&set_id), rng)?;
            ActionOutcome::Done
        }
        SessionAction::LoadForMarkSetCreation {
            image_id,
            coords_id,
        } => {
            let (item, set) = lookup(store, &image_id, &coords_id)?;
            session.load_for_mark_set_creation(item, set);
            ActionOutcome::Done
        }
        SessionAction::LoadForCoordinateCreation { image_id } => {
            let item = store.item(&image_id).ok_or(SessionPrompt::WallNotFound)?;
            session.load_for_coordinate_creation(item);
            ActionOutcome::Done
        }
        SessionAction::StartMemorize => {
            session.start_memorize(rng)?;
            ActionOutcome::Done
        }
        SessionAction::Retry => {
            session.retry()?;
            ActionOutcome::Done
        }
        SessionAction::BeginGuess => {
            session.begin_guess()?;
            ActionOutcome::Done
        }
        SessionAction::ToggleMarker { index } => ActionOutcome::Changed(session.toggle_marker(index)),
        SessionAction::TapImage {
            x,
            y,
            display_width,
            display_height,
        } => ActionOutcome::PointAdded(session.tap_image(
            Point::new(x, y),
            Size {
                width: display_width,
                height: display_height,
            },
        )),
        SessionAction::CheckGuesses => ActionOutcome::Score(session.check_guesses()?),
        SessionAction::SaveCoordinates => {
            ActionOutcome::CoordinatesSaved(session.save_coordinates(store)?)
        }
        SessionAction::PrepareMarkSetSave => {
            ActionOutcome::DefaultName(session.prepare_mark_set_save(store)?)
        }
        SessionAction::CommitMarkSetSave { name } => {
            ActionOutcome::MarkSet(session.commit_mark_set_save(store, &name)?)
        }
        SessionAction::CancelMarkSetSave => {
            session.cancel_mark_set_save();
            ActionOutcome::Done
        }
        SessionAction::Reset => {
            session.reset();
            ActionOutcome::Done
        }
        SessionAction::Unload => {
            session.unload();
            ActionOutcome::Done
        }
    };
    Ok(outcome)
}

/// [`apply_action`] followed by a snapshot of the resulting state.
pub fn apply_and_capture<R: Rng + ?Sized>(
    session: &mut GameSession,
    store: &mut LibraryStore,
    action: SessionAction,
    rng: &mut R,
) -> Result<ActionReply, SessionPrompt> {
    let outcome = apply_action(session, store, action, rng)?;
    Ok(ActionReply {
        outcome,
        snapshot: SessionSnapshot::capture(session, store),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        let action: SessionAction =
            serde_json::from_str(r#"{"type":"toggle_marker","index":3}"#).unwrap();
        assert_eq!(action, SessionAction::ToggleMarker { index: 3 });

        let load: SessionAction =
            serde_json::from_str(r#"{"type":"load_for_play","image_id":"a","coords_id":"b"}"#)
                .unwrap();
        assert_eq!(
            load,
            SessionAction::LoadForPlay {
                image_id: "a".to_string(),
                coords_id: "b".to_string(),
                set_id: None
            }
        );

        let reset: SessionAction = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(reset, SessionAction::Reset);
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(ActionOutcome::Changed(true)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "changed", "value": true}));
        let done = serde_json::to_value(ActionOutcome::Done).unwrap();
        assert_eq!(done, serde_json::json!({"kind": "done"}));
    }

    #[test]
    fn test_unknown_wall_is_reported() {
        let mut store = LibraryStore::in_memory();
        let mut session = GameSession::new();
        let mut rng = rand::thread_rng();
        let result = apply_action(
            &mut session,
            &mut store,
            SessionAction::LoadForCoordinateCreation {
                image_id: "missing".to_string(),
            },
            &mut rng,
        );
        assert_eq!(result, Err(SessionPrompt::WallNotFound));
    }
}
