//! Game session state machine.
//!
//! One session plays over one image and one coordinate layout:
//!
//! ```text
//!   setup ──start──▶ memorize ──ready──▶ guess ──check──▶ result
//!     ▲                  ▲                                  │
//!     │                  └──────── retry / shuffle ─────────┘
//!     └──────────── reset (from any phase) ─────────────────┘
//! ```
//!
//! Two authoring phases sit beside the game: `create_coords` places new points on the
//! image, and `create` picks a subset of existing points to save as a mark set.
//!
//! The session copies what it needs from the library when it loads, and only calls back
//! into [`LibraryStore`] to save coordinates or mark sets.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use rand::seq::{index, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;
use crate::library_model::{CoordinateSet, LibraryItem, MarkSetOutcome, NewMarkSet, Point, SavedMarkSet};
use crate::library_store::LibraryStore;

pub const TARGET_RATIO: f64 = 0.3;
pub const MIN_TARGETS: usize = 2;
pub const MAX_TARGETS: usize = 8;
/// Fewest points a wall needs to be played, and fewest a saved selection may have.
pub const MIN_POINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Setup,
    Memorize,
    Guess,
    Result,
    CreateCoords,
    Create,
}

/// How a marker is drawn. The UI maps these to its theme colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    Neutral,
    Highlighted,
    Correct,
    Incorrect,
    Missed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub correct: usize,
    pub incorrect: usize,
    pub missed: usize,
}

impl Score {
    pub fn compute(targets: &[usize], guessed: &BTreeSet<usize>) -> Self {
        let targets: BTreeSet<usize> = targets.iter().copied().collect();
        let correct = targets.intersection(guessed).count();
        Self {
            correct,
            incorrect: guessed.len() - correct,
            missed: targets.len() - correct,
        }
    }
}

/// A user-facing guard: the action was not taken, and the UI should say why.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPrompt {
    NoActiveWall,
    WallNotFound,
    NotEnoughPoints { required: usize, actual: usize },
    NotEnoughSelected { required: usize, actual: usize },
    NoGuesses,
    NothingToSave,
    NoSavedMarkSets,
    WrongPhase { action: &'static str, phase: GamePhase },
    Store(AppResponse),
}

impl Display for SessionPrompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPrompt::NoActiveWall => write!(f, "Load an image with coordinates first."),
            SessionPrompt::WallNotFound => write!(f, "That wall is no longer in your library."),
            SessionPrompt::NotEnoughPoints { required, actual } => write!(
                f,
                "At least {} points are needed, this wall has {}.",
                required, actual
            ),
            SessionPrompt::NotEnoughSelected { required, .. } => write!(
                f,
                "Please select at least {} points to create a set.",
                required
            ),
            SessionPrompt::NoGuesses => write!(
                f,
                "You haven't selected any points. Tap on the circles to make a guess!"
            ),
            SessionPrompt::NothingToSave => write!(f, "There is no selection waiting to be saved."),
            SessionPrompt::NoSavedMarkSets => write!(f, "This wall has no saved mark sets yet."),
            SessionPrompt::WrongPhase { action, phase } => {
                write!(f, "Cannot {} during the {:?} phase.", action, phase)
            }
            SessionPrompt::Store(err) => write!(f, "{}", err),
        }
    }
}

impl From<SessionPrompt> for AppResponse {
    fn from(prompt: SessionPrompt) -> Self {
        match prompt {
            SessionPrompt::Store(inner) => inner,
            SessionPrompt::WallNotFound => {
                AppResponse::NotFound(SessionPrompt::WallNotFound.to_string())
            }
            other => AppResponse::ValidationError(other.to_string()),
        }
    }
}

/// `clamp(round(total * 0.3), 2, 8)`.
pub fn target_count(total_points: usize) -> usize {
    ((total_points as f64 * TARGET_RATIO).round() as usize).clamp(MIN_TARGETS, MAX_TARGETS)
}

/// Display rule for one marker. Pure; depends only on the phase and the marker's flags.
pub fn marker_style(phase: GamePhase, is_target: bool, is_selected: bool) -> MarkerStyle {
    match phase {
        GamePhase::CreateCoords => MarkerStyle::Highlighted,
        GamePhase::Create if is_selected => MarkerStyle::Highlighted,
        GamePhase::Result => match (is_target, is_selected) {
            (true, true) => MarkerStyle::Correct,
            (false, true) => MarkerStyle::Incorrect,
            (true, false) => MarkerStyle::Missed,
            (false, false) => MarkerStyle::Neutral,
        },
        GamePhase::Memorize if is_target => MarkerStyle::Highlighted,
        GamePhase::Guess if is_selected => MarkerStyle::Highlighted,
        _ => MarkerStyle::Neutral,
    }
}

/// `"Set of {n} ({k})"` with the smallest `k >= 1` not already used by an existing name.
pub fn default_mark_set_name(existing_names: &[String], mark_count: usize) -> String {
    let base = format!("Set of {mark_count}");
    let taken: BTreeSet<u64> = existing_names
        .iter()
        .filter_map(|name| {
            let digits = name.strip_prefix(&base)?.strip_prefix(" (")?.strip_suffix(')')?;
            let canonical = !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && !digits.starts_with('0');
            if canonical {
                digits.parse().ok()
            } else {
                None
            }
        })
        .collect();
    let next = (1..).find(|k| !taken.contains(k)).unwrap_or(1);
    format!("{base} ({next})")
}

/// Picks one of the saved mark sets uniformly at random.
pub fn pick_random_mark_set<'a, R: Rng + ?Sized>(
    coord_set: &'a CoordinateSet,
    rng: &mut R,
) -> Option<&'a SavedMarkSet> {
    coord_set.saved_mark_sets.choose(rng)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Aspect-fit mapping between image pixels and on-screen display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayFit {
    pub image: Size,
    pub display: Size,
}

impl DisplayFit {
    /// Fits the image into `max` keeping its aspect ratio: full width first, then
    /// shrinks to the height limit if needed.
    pub fn fit(image_width: u32, image_height: u32, max: Size) -> Self {
        let image = Size {
            width: f64::from(image_width),
            height: f64::from(image_height),
        };
        let aspect = if image.height > 0.0 { image.width / image.height } else { 1.0 };

        let mut display = Size {
            width: max.width,
            height: max.width / aspect,
        };
        if display.height > max.height {
            display = Size {
                width: max.height * aspect,
                height: max.height,
            };
        }
        Self { image, display }
    }

    /// Converts a display-space tap to image space. `None` if it lands outside the image.
    pub fn to_image_space(&self, tap: Point) -> Option<Point> {
        if self.display.width <= 0.0 || self.display.height <= 0.0 {
            return None;
        }
        let x = tap.x / self.display.width * self.image.width;
        let y = tap.y / self.display.height * self.image.height;
        if !(0.0..=self.image.width).contains(&x) || !(0.0..=self.image.height).contains(&y) {
            return None;
        }
        Some(Point::new(x, y))
    }

    pub fn to_display_space(&self, point: Point) -> Point {
        Point::new(
            point.x * self.display.width / self.image.width,
            point.y * self.display.height / self.image.height,
        )
    }
}

/// The wall currently loaded into a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub image_id: String,
    /// `None` while authoring a new layout that has not been saved yet.
    pub coords_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub coords: Vec<Point>,
}

impl Board {
    fn from_item(item: &LibraryItem, coord_set: Option<&CoordinateSet>) -> Self {
        Self {
            image_id: item.id.clone(),
            coords_id: coord_set.map(|set| set.id.clone()),
            width: item.width,
            height: item.height,
            coords: coord_set.map(|set| set.coords.clone()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameSession {
    phase: GamePhase,
    board: Option<Board>,
    targets: Vec<usize>,
    /// Guesses in `guess`/`result`, the authoring selection in `create`.
    selected: BTreeSet<usize>,
    pending_save: Vec<usize>,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    pub fn new() -> Self {
        Self {
            phase: GamePhase::Setup,
            board: None,
            targets: Vec::new(),
            selected: BTreeSet::new(),
            pending_save: Vec::new(),
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    pub fn selected(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    pub fn pending_save(&self) -> &[usize] {
        &self.pending_save
    }

    pub fn point_count(&self) -> usize {
        self.board.as_ref().map_or(0, |board| board.coords.len())
    }

    /// Loads a wall for play. With `set_id` naming a saved mark set, that set becomes the
    /// target; otherwise a random target set is rolled.
    pub fn load_for_play<R: Rng + ?Sized>(
        &mut self,
        item: &LibraryItem,
        coord_set: &CoordinateSet,
        set_id: Option<&str>,
        rng: &mut R,
    ) -> Result<(), SessionPrompt> {
        self.unload();
        self.board = Some(Board::from_item(item, Some(coord_set)));

        if let Some(saved) = set_id.and_then(|id| coord_set.mark_set(id)) {
            let total = coord_set.coords.len();
            self.targets = saved.indices.iter().copied().filter(|&i| i < total).collect();
            self.phase = GamePhase::Memorize;
            return Ok(());
        }
        self.start_memorize(rng)
    }

    pub fn load_for_mark_set_creation(&mut self, item: &LibraryItem, coord_set: &CoordinateSet) {
        self.unload();
        self.board = Some(Board::from_item(item, Some(coord_set)));
        self.phase = GamePhase::Create;
    }

    pub fn load_for_coordinate_creation(&mut self, item: &LibraryItem) {
        self.unload();
        self.board = Some(Board::from_item(item, None));
        self.phase = GamePhase::CreateCoords;
    }

    /// `setup → memorize`, or a shuffle from `result`: rolls a fresh random target set.
    pub fn start_memorize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SessionPrompt> {
        self.expect_phase("start memorizing", &[GamePhase::Setup, GamePhase::Result])?;
        let total = self.board.as_ref().ok_or(SessionPrompt::NoActiveWall)?.coords.len();
        if total < MIN_POINTS {
            return Err(SessionPrompt::NotEnoughPoints {
                required: MIN_POINTS,
                actual: total,
            });
        }

        self.targets = index::sample(rng, total, target_count(total)).into_vec();
        self.selected.clear();
        self.phase = GamePhase::Memorize;
        Ok(())
    }

    /// `result → memorize` with the same targets.
    pub fn retry(&mut self) -> Result<(), SessionPrompt> {
        self.expect_phase("retry", &[GamePhase::Result])?;
        self.selected.clear();
        self.phase = GamePhase::Memorize;
        Ok(())
    }

    /// `memorize → guess`.
    pub fn begin_guess(&mut self) -> Result<(), SessionPrompt> {
        self.expect_phase("start guessing", &[GamePhase::Memorize])?;
        self.phase = GamePhase::Guess;
        Ok(())
    }

    /// Handles a tap on marker `index`. Returns whether anything changed.
    pub fn toggle_marker(&mut self, index: usize) -> bool {
        if index >= self.point_count() {
            return false;
        }
        match self.phase {
            GamePhase::Guess | GamePhase::Create => {
                if !self.selected.remove(&index) {
                    self.selected.insert(index);
                }
                true
            }
            GamePhase::CreateCoords => match self.board.as_mut() {
                Some(board) => {
                    board.coords.remove(index);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Handles a tap on the image while placing points. `display` is the size the image
    /// is drawn at; the tap is mapped back into image pixels. Taps outside the image
    /// are ignored.
    pub fn tap_image(&mut self, tap: Point, display: Size) -> Option<Point> {
        if self.phase != GamePhase::CreateCoords {
            return None;
        }
        let board = self.board.as_mut()?;
        let fit = DisplayFit {
            image: Size {
                width: f64::from(board.width),
                height: f64::from(board.height),
            },
            display,
        };
        let point = fit.to_image_space(tap)?;
        board.coords.push(point);
        Some(point)
    }

    /// `guess → result`.
    pub fn check_guesses(&mut self) -> Result<Score, SessionPrompt> {
        self.expect_phase("check guesses", &[GamePhase::Guess])?;
        if self.selected.is_empty() {
            return Err(SessionPrompt::NoGuesses);
        }
        self.phase = GamePhase::Result;
        Ok(Score::compute(&self.targets, &self.selected))
    }

    pub fn score(&self) -> Option<Score> {
        (self.phase == GamePhase::Result).then(|| Score::compute(&self.targets, &self.selected))
    }

    /// Saves the points placed in `create_coords` as a coordinate set and returns to setup
    /// with that set loaded.
    pub fn save_coordinates(&mut self, store: &mut LibraryStore) -> Result<CoordinateSet, SessionPrompt> {
        self.expect_phase("save coordinates", &[GamePhase::CreateCoords])?;
        let board = self.board.as_mut().ok_or(SessionPrompt::NoActiveWall)?;
        if board.coords.len() < MIN_POINTS {
            return Err(SessionPrompt::NotEnoughPoints {
                required: MIN_POINTS,
                actual: board.coords.len(),
            });
        }

        let saved = store
            .add_coordinates(&board.image_id, board.coords.clone())
            .map_err(SessionPrompt::Store)?
            .ok_or(SessionPrompt::WallNotFound)?;

        board.coords_id = Some(saved.id.clone());
        board.coords = saved.coords.clone();
        self.phase = GamePhase::Setup;
        Ok(saved)
    }

    /// Stages the current selection for saving and returns the suggested name.
    ///
    /// In `create` the authoring selection is staged; in the game phases the current
    /// targets are.
    pub fn prepare_mark_set_save(&mut self, store: &LibraryStore) -> Result<String, SessionPrompt> {
        let board = self.board.as_ref().ok_or(SessionPrompt::NoActiveWall)?;
        let coords_id = board.coords_id.as_deref().ok_or(SessionPrompt::NoActiveWall)?;

        let indices: Vec<usize> = match self.phase {
            GamePhase::Create => {
                if self.selected.len() < MIN_POINTS {
                    return Err(SessionPrompt::NotEnoughSelected {
                        required: MIN_POINTS,
                        actual: self.selected.len(),
                    });
                }
                self.selected.iter().copied().collect()
            }
            GamePhase::Memorize | GamePhase::Guess | GamePhase::Result => {
                if self.targets.is_empty() {
                    return Err(SessionPrompt::NothingToSave);
                }
                self.targets.clone()
            }
            phase => {
                return Err(SessionPrompt::WrongPhase {
                    action: "save a mark set",
                    phase,
                })
            }
        };

        let names = store.mark_set_names(&board.image_id, coords_id);
        let name = default_mark_set_name(&names, indices.len());
        self.pending_save = indices;
        Ok(name)
    }

    /// Saves the staged indices under `name`. Leaving `create` returns the session to setup.
    pub fn commit_mark_set_save(
        &mut self,
        store: &mut LibraryStore,
        name: &str,
    ) -> Result<MarkSetOutcome, SessionPrompt> {
        if self.pending_save.is_empty() {
            return Err(SessionPrompt::NothingToSave);
        }
        let board = self.board.as_ref().ok_or(SessionPrompt::NoActiveWall)?;
        let coords_id = board.coords_id.as_deref().ok_or(SessionPrompt::NoActiveWall)?;

        let outcome = store
            .add_saved_mark_set(
                &board.image_id,
                coords_id,
                NewMarkSet::new(name.trim(), self.pending_save.clone()),
            )
            .map_err(SessionPrompt::Store)?;

        self.pending_save.clear();
        if self.phase == GamePhase::Create && outcome.is_saved() {
            self.selected.clear();
            self.phase = GamePhase::Setup;
        }
        Ok(outcome)
    }

    pub fn cancel_mark_set_save(&mut self) {
        self.pending_save.clear();
    }

    /// Any phase `→ setup`. Keeps the loaded wall.
    pub fn reset(&mut self) {
        self.phase = GamePhase::Setup;
        self.targets.clear();
        self.selected.clear();
        self.pending_save.clear();
    }

    /// Resets and forgets the loaded wall.
    pub fn unload(&mut self) {
        self.reset();
        self.board = None;
    }

    pub fn marker_style(&self, index: usize) -> MarkerStyle {
        marker_style(
            self.phase,
            self.targets.contains(&index),
            self.selected.contains(&index),
        )
    }

    pub fn marker_styles(&self) -> Vec<MarkerStyle> {
        (0..self.point_count()).map(|i| self.marker_style(i)).collect()
    }

    /// The saved mark set whose indices are exactly the current targets, if any.
    pub fn matching_mark_set<'a>(&self, coord_set: &'a CoordinateSet) -> Option<&'a SavedMarkSet> {
        if self.targets.is_empty() {
            return None;
        }
        let targets: BTreeSet<usize> = self.targets.iter().copied().collect();
        coord_set.saved_mark_sets.iter().find(|saved| {
            saved.indices.len() == targets.len() && saved.indices.iter().all(|i| targets.contains(i))
        })
    }

    /// Whether the targets being played were rolled rather than loaded from a saved set.
    pub fn is_unsaved_set(&self, coord_set: &CoordinateSet) -> bool {
        !matches!(self.phase, GamePhase::Setup | GamePhase::Create)
            && !self.targets.is_empty()
            && self.matching_mark_set(coord_set).is_none()
    }

    pub fn status_text(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match self.phase {
            GamePhase::Setup if self.point_count() > 0 => "Ready to play!".to_string(),
            GamePhase::Setup => "Load an image to start".to_string(),
            GamePhase::Memorize => {
                format!("Memorize the {} highlighted points!", self.targets.len())
            }
            GamePhase::Guess => format!("Guess: {} selected", self.selected.len()),
            GamePhase::Result => "Results are in!".to_string(),
            GamePhase::CreateCoords => {
                let count = self.point_count();
                format!("Create Points: {} point{} placed", count, plural(count))
            }
            GamePhase::Create => {
                let count = self.selected.len();
                format!("Create Set: {} point{} selected", count, plural(count))
            }
        }
    }

    fn expect_phase(&self, action: &'static str, allowed: &[GamePhase]) -> Result<(), SessionPrompt> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionPrompt::WrongPhase {
                action,
                phase: self.phase,
            })
        }
    }
}
