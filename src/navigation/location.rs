//! Locations and path strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A pathname with its search and hash parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub pathname: String,
    /// Empty, or starting with `?`.
    pub search: String,
    /// Empty, or starting with `#`.
    pub hash: String,
}

impl Path {
    /// Render as `pathname?search#hash`.
    pub fn to_href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }
}

/// A path string split into its parts; absent parts are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialPath {
    pub pathname: Option<String>,
    pub search: Option<String>,
    pub hash: Option<String>,
}

/// Split `path` into pathname, search and hash.
pub fn parse_path(path: &str) -> PartialPath {
    let mut parsed = PartialPath::default();
    let mut rest = path;
    if let Some(i) = rest.find('#') {
        parsed.hash = Some(rest[i..].to_string());
        rest = &rest[..i];
    }
    if let Some(i) = rest.find('?') {
        parsed.search = Some(rest[i..].to_string());
        rest = &rest[..i];
    }
    if !rest.is_empty() {
        parsed.pathname = Some(rest.to_string());
    }
    parsed
}

pub(crate) fn normalize_search(search: &str) -> String {
    match search {
        "" | "?" => String::new(),
        s if s.starts_with('?') => s.to_string(),
        s => format!("?{s}"),
    }
}

pub(crate) fn normalize_hash(hash: &str) -> String {
    match hash {
        "" | "#" => String::new(),
        h if h.starts_with('#') => h.to_string(),
        h => format!("#{h}"),
    }
}

/// An entry in the navigation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub pathname: String,
    pub search: String,
    pub hash: String,
    /// Caller-supplied state attached to the entry.
    pub state: Option<Value>,
    /// Unique key of the entry; `"default"` for the initial one.
    pub key: String,
}

impl Location {
    /// Create a location with a fresh key.
    pub fn new(path: Path, state: Option<Value>) -> Self {
        Self {
            pathname: path.pathname,
            search: path.search,
            hash: path.hash,
            state,
            key: Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    /// Parse an href into the initial (`"default"` keyed) location.
    pub fn initial(href: &str) -> Self {
        let parsed = parse_path(href);
        Self {
            pathname: parsed.pathname.unwrap_or_else(|| "/".to_string()),
            search: normalize_search(parsed.search.as_deref().unwrap_or("")),
            hash: normalize_hash(parsed.hash.as_deref().unwrap_or("")),
            state: None,
            key: "default".to_string(),
        }
    }

    pub fn path(&self) -> Path {
        Path {
            pathname: self.pathname.clone(),
            search: self.search.clone(),
            hash: self.hash.clone(),
        }
    }

    pub fn href(&self) -> String {
        self.path().to_href()
    }

    /// Return true if only the hash differs from `other`.
    pub fn is_hash_change_of(&self, other: &Location) -> bool {
        self.pathname == other.pathname
            && self.search == other.search
            && !self.hash.is_empty()
            && self.hash != other.hash
    }
}
