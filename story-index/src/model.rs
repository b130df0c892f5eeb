//! Shared data model: specifiers, index entries and the story index.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Current version of the serialized index format.
pub const INDEX_VERSION: u32 = 4;

/// Glob used when a story entry names a bare directory.
pub const DEFAULT_FILES_GLOB: &str = "**/*.stories.*";

/// Identifier of one addressable story, e.g. `example-button--primary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(String);

impl StoryId {
    /// Wrap an already-formed id. Use [`crate::id::to_id`] to derive one.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StoryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StoryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StoryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A region of the filesystem to scan for story files.
///
/// `directory` is relative to the working directory and always stored with
/// forward slashes and a leading `./`. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorySpecifier {
    directory: String,
    files: String,
    title_prefix: String,
}

impl StorySpecifier {
    /// Create a specifier from a directory and a file glob relative to it.
    pub fn new(directory: impl AsRef<str>, files: impl Into<String>) -> Self {
        Self {
            directory: normalize_directory(directory.as_ref()),
            files: files.into(),
            title_prefix: String::new(),
        }
    }

    /// Split a single glob entry such as `./src/**/*.stories.rs` into its
    /// literal directory and the file glob below it.
    ///
    /// An entry without glob characters is treated as a directory and scanned
    /// with [`DEFAULT_FILES_GLOB`].
    pub fn from_entry(entry: &str) -> Self {
        let normalized = entry.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').collect();
        let first_glob = segments
            .iter()
            .position(|s| s.contains(|c: char| matches!(c, '*' | '?' | '[' | '{')));

        match first_glob {
            Some(idx) => Self::new(segments[..idx].join("/"), segments[idx..].join("/")),
            None => Self::new(&normalized, DEFAULT_FILES_GLOB),
        }
    }

    /// Set the prefix prepended to every title found under this specifier.
    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn files(&self) -> &str {
        &self.files
    }

    pub fn title_prefix(&self) -> &str {
        &self.title_prefix
    }

    /// The full glob relative to the working directory, e.g. `./src/**/*.stories.*`.
    pub fn pattern(&self) -> String {
        format!("{}/{}", self.directory, self.files)
    }
}

impl fmt::Display for StorySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.title_prefix.is_empty() {
            write!(f, "{}", self.pattern())
        } else {
            write!(f, "{} (title prefix '{}')", self.pattern(), self.title_prefix)
        }
    }
}

fn normalize_directory(dir: &str) -> String {
    let dir = dir.replace('\\', "/");
    let trimmed = dir.trim_start_matches("./").trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        ".".to_string()
    } else if trimmed.starts_with('/') || trimmed.starts_with("../") {
        trimmed.to_string()
    } else {
        format!("./{trimmed}")
    }
}

/// Derived, static parameters attached to an index entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryParameters {
    /// Story exists purely for documentation display.
    #[serde(default, skip_serializing_if = "is_false")]
    pub docs_only: bool,

    /// Statically extracted story parameters.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntryParameters {
    pub fn is_empty(&self) -> bool {
        !self.docs_only && self.extra.is_empty()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One addressable story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: StoryId,
    pub name: String,
    pub title: String,
    pub import_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "EntryParameters::is_empty")]
    pub parameters: EntryParameters,
}

impl IndexEntry {
    pub fn is_docs_only(&self) -> bool {
        self.parameters.docs_only
    }
}

/// The ordered set of all known stories.
///
/// Entry order is significant: it is either the sorted order or, without a
/// sort parameter, the specifier discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryIndex {
    v: u32,
    entries: Vec<IndexEntry>,
    positions: HashMap<StoryId, usize>,
}

impl Default for StoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl StoryIndex {
    /// Create an empty index at the current format version.
    pub fn new() -> Self {
        Self {
            v: INDEX_VERSION,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build an index from entries in order, keeping the first of any
    /// duplicate ids.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            if !index.insert(entry) {
                warn!("Dropping duplicate index entry");
            }
        }
        index
    }

    /// Append an entry. Returns `false` (and leaves the index unchanged) if
    /// the id is already present.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        if self.positions.contains_key(&entry.id) {
            return false;
        }
        self.positions.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn version(&self) -> u32 {
        self.v
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// First entry in index order.
    pub fn first(&self) -> Option<&IndexEntry> {
        self.entries.first()
    }

    /// Entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Ids in index order.
    pub fn ids(&self) -> impl Iterator<Item = &StoryId> {
        self.entries.iter().map(|e| &e.id)
    }

    /// Entries shown in interactive listings (docs-only stories excluded).
    pub fn interactive_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter().filter(|e| !e.is_docs_only())
    }

    /// Id to entry map, for order-insensitive comparison.
    pub fn to_map(&self) -> HashMap<&StoryId, &IndexEntry> {
        self.entries.iter().map(|e| (&e.id, e)).collect()
    }

    /// Serialize to the versioned JSON format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse the versioned JSON format.
    ///
    /// Unknown versions and malformed entries are logged and parsed on a
    /// best-effort basis rather than rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Serialize for StoryIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Entries<'a>(&'a [IndexEntry]);

        impl Serialize for Entries<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for entry in self.0 {
                    map.serialize_entry(entry.id.as_str(), entry)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("v", &self.v)?;
        map.serialize_entry("entries", &Entries(&self.entries))?;
        map.end()
    }
}

/// Wire shape accepted when parsing, before per-entry validation.
#[derive(Deserialize)]
struct RawIndex {
    #[serde(default)]
    v: Option<u32>,
    #[serde(default)]
    entries: Map<String, Value>,
}

impl<'de> Deserialize<'de> for StoryIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawIndex::deserialize(deserializer)?;
        let version = match raw.v {
            Some(v) if v == INDEX_VERSION => v,
            Some(v) => {
                warn!(found = v, expected = INDEX_VERSION, "Unknown story index version, parsing best-effort");
                v
            }
            None => {
                warn!(expected = INDEX_VERSION, "Story index has no version, parsing best-effort");
                INDEX_VERSION
            }
        };

        let mut index = StoryIndex {
            v: version,
            entries: Vec::with_capacity(raw.entries.len()),
            positions: HashMap::with_capacity(raw.entries.len()),
        };

        for (key, mut value) in raw.entries {
            if let Value::Object(obj) = &mut value {
                obj.entry("id").or_insert_with(|| Value::String(key.clone()));
            }
            match serde_json::from_value::<IndexEntry>(value) {
                Ok(entry) => {
                    if !index.insert(entry) {
                        warn!(key = %key, "Skipping duplicate index entry");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed index entry"),
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, title: &str, name: &str) -> IndexEntry {
        IndexEntry {
            id: StoryId::from(id),
            name: name.to_string(),
            title: title.to_string(),
            import_path: "./src/a.stories.rs".to_string(),
            tags: vec![],
            parameters: EntryParameters::default(),
        }
    }

    #[test]
    fn test_specifier_from_entry_splits_glob() {
        let spec = StorySpecifier::from_entry("./src/components/**/*.stories.*");
        assert_eq!(spec.directory(), "./src/components");
        assert_eq!(spec.files(), "**/*.stories.*");
        assert_eq!(spec.pattern(), "./src/components/**/*.stories.*");
    }

    #[test]
    fn test_specifier_from_bare_directory() {
        let spec = StorySpecifier::from_entry("src/");
        assert_eq!(spec.directory(), "./src");
        assert_eq!(spec.files(), DEFAULT_FILES_GLOB);
    }

    #[test]
    fn test_specifier_root_directory() {
        let spec = StorySpecifier::from_entry("*.stories.*");
        assert_eq!(spec.directory(), ".");
        assert_eq!(spec.pattern(), "./*.stories.*");
    }

    #[test]
    fn test_title_prefix_trimmed() {
        let spec = StorySpecifier::new("./lib", "*.stories.*").with_title_prefix("/Lib/");
        assert_eq!(spec.title_prefix(), "Lib");
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut index = StoryIndex::new();
        assert!(index.insert(entry("a--1", "A", "1")));
        assert!(!index.insert(entry("a--1", "Other", "1")));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a--1").unwrap().title, "A");
    }

    #[test]
    fn test_round_trip_preserves_entries_and_order() {
        let mut docs = entry("b--page", "B", "Page");
        docs.parameters.docs_only = true;
        docs.tags = vec!["autodocs".to_string()];
        let index = StoryIndex::from_entries(vec![
            entry("z--1", "Z", "1"),
            entry("a--1", "A", "1"),
            docs,
        ]);

        let json = index.to_json().unwrap();
        let parsed = StoryIndex::from_json(&json).unwrap();

        assert_eq!(parsed.to_map(), index.to_map());
        let ids: Vec<_> = parsed.ids().map(StoryId::as_str).collect();
        assert_eq!(ids, vec!["z--1", "a--1", "b--page"]);
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_serialized_shape() {
        let index = StoryIndex::from_entries(vec![entry("a--1", "A", "1")]);
        let value: Value = serde_json::from_str(&index.to_json().unwrap()).unwrap();
        assert_eq!(value["v"], json!(INDEX_VERSION));
        assert_eq!(value["entries"]["a--1"]["importPath"], "./src/a.stories.rs");
        assert!(value["entries"]["a--1"].get("tags").is_none());
    }

    #[test]
    fn test_unknown_version_parsed_best_effort() {
        let json = json!({
            "v": 99,
            "entries": {
                "a--1": { "name": "1", "title": "A", "importPath": "./a.rs" },
                "broken": { "title": 7 }
            }
        });
        let index: StoryIndex = serde_json::from_value(json).unwrap();
        assert_eq!(index.version(), 99);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a--1").unwrap().id.as_str(), "a--1");
    }

    #[test]
    fn test_interactive_entries_skip_docs_only() {
        let mut page = entry("a--page", "A", "Page");
        page.parameters.docs_only = true;
        let index = StoryIndex::from_entries(vec![page, entry("b--1", "B", "1")]);
        let ids: Vec<_> = index.interactive_entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b--1"]);
    }
}
