//! Injected history collaborator.
//!
//! # Responsibilities
//! - Define the push/replace/listen surface the router writes through
//! - Provide an in-memory implementation for tests and non-browser hosts
//!
//! # Design Decisions
//! - `push`/`replace` never notify listeners; only traversal (`go`) does,
//!   and it reports a `Pop`
//! - Listeners run outside the entry lock

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::lock;
use crate::navigation::location::{Location, Path};
use crate::navigation::subscribers::{Subscribers, Unsubscribe};

/// How the current history entry was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    /// Traversal (back/forward) or the initial entry.
    #[default]
    Pop,
    Push,
    Replace,
}

/// A traversal reported to history listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryUpdate {
    pub action: HistoryAction,
    pub location: Location,
    pub delta: isize,
}

pub type HistoryListener = Box<dyn Fn(&HistoryUpdate) + Send + Sync>;

/// The history stack the router reads and writes.
pub trait History: Send + Sync + fmt::Debug {
    fn location(&self) -> Location;

    fn action(&self) -> HistoryAction;

    /// Add an entry and return the stored location.
    fn push(&self, path: Path, state: Option<Value>) -> Location;

    /// Overwrite the current entry and return the stored location.
    fn replace(&self, path: Path, state: Option<Value>) -> Location;

    /// Move `delta` entries; listeners observe the result as a `Pop`.
    fn go(&self, delta: isize);

    fn listen(&self, listener: HistoryListener) -> Unsubscribe;

    fn create_href(&self, path: &Path) -> String {
        path.to_href()
    }
}

#[derive(Debug)]
struct Entries {
    stack: Vec<Location>,
    index: usize,
    action: HistoryAction,
}

/// History kept entirely in memory.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Entries>,
    listeners: Subscribers<HistoryUpdate>,
}

impl MemoryHistory {
    /// Start with `initial_entries` (default `["/"]`), positioned on the last.
    pub fn new<S: AsRef<str>>(initial_entries: &[S]) -> Self {
        let mut stack: Vec<Location> = initial_entries
            .iter()
            .enumerate()
            .map(|(i, href)| {
                let mut location = Location::initial(href.as_ref());
                if i > 0 {
                    location = Location::new(location.path(), None);
                }
                location
            })
            .collect();
        if stack.is_empty() {
            stack.push(Location::initial("/"));
        }
        let index = stack.len() - 1;
        Self {
            entries: Mutex::new(Entries {
                stack,
                index,
                action: HistoryAction::Pop,
            }),
            listeners: Subscribers::new(),
        }
    }

    /// Single entry at `href`.
    pub fn at(href: &str) -> Self {
        Self::new(&[href])
    }

    pub fn index(&self) -> usize {
        lock(&self.entries).index
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).stack.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).stack.is_empty()
    }

    /// Hrefs of every entry, oldest first.
    pub fn hrefs(&self) -> Vec<String> {
        lock(&self.entries).stack.iter().map(Location::href).collect()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::at("/")
    }
}

impl History for MemoryHistory {
    fn location(&self) -> Location {
        let entries = lock(&self.entries);
        entries.stack[entries.index].clone()
    }

    fn action(&self) -> HistoryAction {
        lock(&self.entries).action
    }

    fn push(&self, path: Path, state: Option<Value>) -> Location {
        let location = Location::new(path, state);
        let mut entries = lock(&self.entries);
        let next = entries.index + 1;
        entries.stack.truncate(next);
        entries.stack.push(location.clone());
        entries.index = next;
        entries.action = HistoryAction::Push;
        location
    }

    fn replace(&self, path: Path, state: Option<Value>) -> Location {
        let location = Location::new(path, state);
        let mut entries = lock(&self.entries);
        let index = entries.index;
        entries.stack[index] = location.clone();
        entries.action = HistoryAction::Replace;
        location
    }

    fn go(&self, delta: isize) {
        let update = {
            let mut entries = lock(&self.entries);
            let max = entries.stack.len().saturating_sub(1) as isize;
            let target = (entries.index as isize + delta).clamp(0, max) as usize;
            if target == entries.index {
                return;
            }
            let moved = target as isize - entries.index as isize;
            entries.index = target;
            entries.action = HistoryAction::Pop;
            HistoryUpdate {
                action: HistoryAction::Pop,
                location: entries.stack[target].clone(),
                delta: moved,
            }
        };
        tracing::trace!(delta = update.delta, to = %update.location.href(), "History traversal");
        self.listeners.notify(&update);
    }

    fn listen(&self, listener: HistoryListener) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }
}
