//! Navigation history of viewport positions, with on-disk persistence

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::geom::Point;

const DEFAULT_CAPACITY: usize = 32;

const fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// One restorable viewport position
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewingState {
    pub page: usize,
    /// Offset within the page, in page units
    pub offset: Point,
    pub scale: f32,
}

impl ViewingState {
    #[must_use]
    pub const fn new(page: usize, offset: Point, scale: f32) -> Self {
        Self {
            page,
            offset,
            scale,
        }
    }
}

/// Linear back/forward history of viewing states.
///
/// Pushing while the cursor sits behind the newest entry discards the
/// forward states, like a browser history. Capacity is bounded; the oldest
/// entries fall off the front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewingStateStack {
    states: VecDeque<ViewingState>,
    cursor: usize,
    #[serde(default = "default_capacity")]
    max_size: usize,
}

impl Default for ViewingStateStack {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ViewingStateStack {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            states: VecDeque::with_capacity(max_size),
            cursor: 0,
            max_size,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Append `state` after the cursor, discarding any forward history. A
    /// push equal to the current state leaves the history unchanged.
    pub fn push(&mut self, state: ViewingState) {
        if !self.states.is_empty() {
            self.states.truncate(self.cursor + 1);
        }
        if self.states.back() == Some(&state) {
            self.cursor = self.states.len() - 1;
            return;
        }
        self.states.push_back(state);
        while self.states.len() > self.max_size {
            self.states.pop_front();
        }
        self.cursor = self.states.len() - 1;
    }

    #[must_use]
    pub fn previous_allowed(&self) -> bool {
        !self.states.is_empty() && self.cursor > 0
    }

    #[must_use]
    pub fn next_allowed(&self) -> bool {
        self.cursor + 1 < self.states.len()
    }

    /// Step the cursor back and return the new current state; None at the
    /// oldest entry.
    pub fn previous(&mut self) -> Option<ViewingState> {
        if !self.previous_allowed() {
            return None;
        }
        self.cursor -= 1;
        self.states.get(self.cursor).copied()
    }

    /// Step the cursor forward and return the new current state; None at
    /// the newest entry.
    pub fn next(&mut self) -> Option<ViewingState> {
        if !self.next_allowed() {
            return None;
        }
        self.cursor += 1;
        self.states.get(self.cursor).copied()
    }

    #[must_use]
    pub fn current(&self) -> Option<ViewingState> {
        self.states.get(self.cursor).copied()
    }

    /// Overwrite the current entry in place, for position updates that
    /// should not create history. Seeds the stack when it is empty.
    pub fn record(&mut self, state: ViewingState) {
        match self.states.get_mut(self.cursor) {
            Some(current) => *current = state,
            None => {
                self.states.push_back(state);
                self.cursor = self.states.len() - 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.cursor = 0;
    }
}

/// One document's history plus when it was last open
#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub stack: ViewingStateStack,
    pub last_viewed: chrono::DateTime<chrono::Utc>,
}

/// Viewing histories for every known document, keyed by document identity
/// (conventionally the file path), stored as one JSON file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ViewingArchive {
    docs: HashMap<String, ArchiveEntry>,
    #[serde(skip)]
    file_path: Option<String>,
}

impl ViewingArchive {
    pub fn ephemeral() -> Self {
        Self {
            docs: HashMap::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: &str) -> Self {
        Self {
            docs: HashMap::new(),
            file_path: Some(file_path.to_string()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&str>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load viewing states from {}: {}", path, e);
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let path = Path::new(file_path);
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut archive: Self = serde_json::from_str(&content)?;
            archive.file_path = Some(file_path.to_string());
            Ok(archive)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    /// Write the archive next to its final path and rename into place, so a
    /// crash mid-write never truncates the previous file.
    pub fn save(&self) -> anyhow::Result<()> {
        match &self.file_path {
            Some(path) => {
                let content = serde_json::to_string_pretty(self)?;
                let staging = format!("{path}.tmp");
                fs::write(&staging, content)?;
                fs::rename(&staging, path)?;
                Ok(())
            }
            None => {
                // Ephemeral archives don't save to disk
                Ok(())
            }
        }
    }

    pub fn get(&self, doc: &str) -> Option<&ViewingStateStack> {
        self.docs.get(doc).map(|entry| &entry.stack)
    }

    pub fn get_most_recent(&self) -> Option<(String, &ArchiveEntry)> {
        self.docs
            .iter()
            .max_by_key(|(_, entry)| entry.last_viewed)
            .map(|(doc, entry)| (doc.clone(), entry))
    }

    /// Replace `doc`'s history and stamp it as viewed now.
    pub fn update(&mut self, doc: &str, stack: ViewingStateStack) {
        self.docs.insert(
            doc.to_string(),
            ArchiveEntry {
                stack,
                last_viewed: chrono::Utc::now(),
            },
        );
        if !self.docs.is_empty() && self.file_path.is_some() {
            if let Err(e) = self.save() {
                log::error!("Failed to save viewing states: {}", e);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArchiveEntry)> {
        self.docs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(page: usize) -> ViewingState {
        ViewingState::new(page, Point::new(0.0, 10.0 * page as f32), 1.0)
    }

    #[test]
    fn push_after_previous_discards_forward_history() {
        let mut stack = ViewingStateStack::new(10);
        stack.push(state(1));
        stack.push(state(2));
        stack.push(state(3));

        assert_eq!(stack.previous(), Some(state(2)));
        assert_eq!(stack.previous(), Some(state(1)));
        assert_eq!(stack.current(), Some(state(1)));

        stack.push(state(5));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.current(), Some(state(5)));
        assert!(!stack.next_allowed());
        assert_eq!(stack.next(), None);
        assert_eq!(stack.previous(), Some(state(1)));
    }

    #[test]
    fn previous_and_next_stop_at_bounds() {
        let mut stack = ViewingStateStack::new(10);
        assert_eq!(stack.previous(), None);
        assert_eq!(stack.next(), None);

        stack.push(state(1));
        stack.push(state(2));

        assert_eq!(stack.previous(), Some(state(1)));
        assert!(!stack.previous_allowed());
        assert_eq!(stack.previous(), None);

        assert_eq!(stack.next(), Some(state(2)));
        assert!(!stack.next_allowed());
        assert_eq!(stack.next(), None);
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let mut stack = ViewingStateStack::new(10);
        stack.push(state(1));
        stack.push(state(1));
        assert_eq!(stack.len(), 1);
        assert!(!stack.previous_allowed());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut stack = ViewingStateStack::new(3);
        for page in 0..5 {
            stack.push(state(page));
        }
        assert_eq!(stack.len(), 3);

        stack.previous();
        stack.previous();
        assert_eq!(stack.current(), Some(state(2)));
        assert!(!stack.previous_allowed());
    }

    #[test]
    fn record_does_not_create_history() {
        let mut stack = ViewingStateStack::new(10);
        stack.record(state(1));
        assert_eq!(stack.current(), Some(state(1)));
        assert_eq!(stack.len(), 1);

        stack.push(state(2));
        stack.record(state(7));
        assert_eq!(stack.current(), Some(state(7)));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.previous(), Some(state(1)));
    }

    #[test]
    fn stack_round_trips_through_json() {
        let mut stack = ViewingStateStack::new(10);
        stack.push(state(1));
        stack.push(state(2));
        stack.push(state(3));
        stack.previous();

        let json = serde_json::to_string(&stack).unwrap();
        let mut restored: ViewingStateStack = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.current(), Some(state(2)));
        assert!(restored.next_allowed());
        assert_eq!(restored.next(), Some(state(3)));
    }

    #[test]
    fn archive_saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewing_states.json");
        let path = path.to_str().unwrap();

        let mut archive = ViewingArchive::with_file(path);
        let mut stack = ViewingStateStack::new(10);
        stack.push(state(4));
        archive.update("book.pdf", stack);

        let reloaded = ViewingArchive::load_or_ephemeral(Some(path));
        let restored = reloaded.get("book.pdf").unwrap();
        assert_eq!(restored.current(), Some(state(4)));

        let (doc, _) = reloaded.get_most_recent().unwrap();
        assert_eq!(doc, "book.pdf");
    }

    #[test]
    fn missing_archive_file_is_not_fatal() {
        let archive = ViewingArchive::load_or_ephemeral(Some("/nonexistent/dir/states.json"));
        assert!(archive.get("book.pdf").is_none());
        archive.save().unwrap_err();
    }

    #[test]
    fn ephemeral_archive_save_is_a_noop() {
        let mut archive = ViewingArchive::ephemeral();
        archive.update("book.pdf", ViewingStateStack::default());
        archive.save().unwrap();
    }
}
