//! The story index generator.
//!
//! Owns a per-specifier, per-file cache of extraction results. Files are kept
//! in a canonical (path-sorted) order from the moment they are discovered, so
//! the unsorted index never depends on the completion order of file reads.
//! Invalidation only marks files; the work happens lazily in
//! [`StoryIndexGenerator::get_index`].

use crate::error::IndexGenerationError;
use crate::extract::{CsfExtractor, Extracted, Extractor};
use crate::id::{story_name_from_export, to_id};
use crate::model::{EntryParameters, IndexEntry, StoryId, StoryIndex, StorySpecifier};
use crate::resolve::{import_path, specifier_matches, FileResolver, GlobResolver};
use crate::sort::{sort_entries, StorySort};
use crate::title::user_or_auto_title;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Export name of the story that marks a file as documentation only.
pub const DOCS_ONLY_EXPORT: &str = "__page";

// ===== Options =====

/// Configuration for a [`StoryIndexGenerator`].
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Root that specifier directories and import paths are relative to.
    pub working_dir: PathBuf,

    /// Ordering applied to the merged index.
    pub story_sort: Option<StorySort>,

    /// Export name that, as the only story of a file, marks it docs-only.
    pub docs_only_export: String,
}

impl IndexerOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            story_sort: None,
            docs_only_export: DOCS_ONLY_EXPORT.to_string(),
        }
    }

    /// Set the story sort parameter.
    pub fn with_story_sort(mut self, sort: StorySort) -> Self {
        self.story_sort = Some(sort);
        self
    }

    /// Set the docs-only sentinel export name.
    pub fn with_docs_only_export(mut self, export: impl Into<String>) -> Self {
        self.docs_only_export = export.into();
        self
    }
}

// ===== Cache =====

/// Modification signal for a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileToken {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileToken {
    /// Stat `path`. `None` if the file cannot be read.
    pub async fn read(path: &Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    token: Option<FileToken>,
    extracted: Extracted,
}

#[derive(Debug, Clone)]
enum CacheSlot {
    /// Discovered or invalidated, awaiting extraction.
    Pending,
    Ready(CacheEntry),
}

#[derive(Debug)]
struct SpecifierCache {
    specifier: StorySpecifier,
    files: BTreeMap<PathBuf, CacheSlot>,
}

// ===== Generator =====

/// Builds and maintains the story index for a set of specifiers.
pub struct StoryIndexGenerator {
    options: IndexerOptions,
    caches: Vec<SpecifierCache>,
    extractor: Arc<dyn Extractor>,
    resolver: Arc<dyn FileResolver>,
    initialized: bool,
    index: Option<Arc<StoryIndex>>,
    previous: Option<Arc<StoryIndex>>,
}

impl StoryIndexGenerator {
    /// Create a generator with the filesystem resolver and CSF extractor.
    pub fn new(specifiers: Vec<StorySpecifier>, options: IndexerOptions) -> Self {
        Self {
            options,
            caches: specifiers
                .into_iter()
                .map(|specifier| SpecifierCache {
                    specifier,
                    files: BTreeMap::new(),
                })
                .collect(),
            extractor: Arc::new(CsfExtractor),
            resolver: Arc::new(GlobResolver),
            initialized: false,
            index: None,
            previous: None,
        }
    }

    /// Replace the extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the file resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn FileResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    pub fn specifiers(&self) -> impl Iterator<Item = &StorySpecifier> {
        self.caches.iter().map(|c| &c.specifier)
    }

    /// Number of files currently tracked across all specifiers.
    pub fn file_count(&self) -> usize {
        self.caches.iter().map(|c| c.files.len()).sum()
    }

    /// The last index that was successfully built, kept across failed rebuilds.
    pub fn previous_index(&self) -> Option<Arc<StoryIndex>> {
        self.index.clone().or_else(|| self.previous.clone())
    }

    /// Resolve every specifier, extract every file once and build the index.
    ///
    /// Calling this again discards the cache and starts over.
    pub async fn initialize(&mut self) -> Result<Arc<StoryIndex>, IndexGenerationError> {
        self.discover().await?;
        self.build().await
    }

    /// The memoized index. Extracts only pending files and re-sorts only when
    /// something was invalidated since the last build.
    pub async fn get_index(&mut self) -> Result<Arc<StoryIndex>, IndexGenerationError> {
        if !self.initialized {
            self.discover().await?;
        }
        self.build().await
    }

    /// Invalidate one file of `specifier`.
    ///
    /// With `removed` the file and its entries are dropped for good. Otherwise
    /// the file is queued for re-extraction, which also covers a newly created
    /// file that the specifier matches.
    pub fn invalidate(&mut self, specifier: &StorySpecifier, path: &Path, removed: bool) {
        let working_dir = self.options.working_dir.clone();
        let Some(cache) = self.caches.iter_mut().find(|c| c.specifier == *specifier) else {
            warn!(specifier = %specifier, "Invalidation for unknown specifier");
            return;
        };

        if removed {
            if cache.files.remove(path).is_none() {
                debug!(path = %path.display(), "Removed file was not cached");
                return;
            }
            debug!(path = %path.display(), "Dropped story file");
        } else if let Some(slot) = cache.files.get_mut(path) {
            *slot = CacheSlot::Pending;
            debug!(path = %path.display(), "Queued story file for re-extraction");
        } else if specifier_matches(&working_dir, &cache.specifier, path) {
            cache.files.insert(path.to_path_buf(), CacheSlot::Pending);
            debug!(path = %path.display(), "Discovered new story file");
        } else {
            return;
        }

        self.mark_stale();
    }

    /// Invalidate `path` under every specifier that covers it. Returns whether
    /// any specifier was affected.
    pub fn invalidate_path(&mut self, path: &Path, removed: bool) -> bool {
        let working_dir = &self.options.working_dir;
        let affected: Vec<StorySpecifier> = self
            .caches
            .iter()
            .filter(|c| {
                c.files.contains_key(path)
                    || (!removed && specifier_matches(working_dir, &c.specifier, path))
            })
            .map(|c| c.specifier.clone())
            .collect();

        for specifier in &affected {
            self.invalidate(specifier, path, removed);
        }
        !affected.is_empty()
    }

    /// Re-stat every extracted file and invalidate those whose token changed.
    /// Returns the number of files invalidated.
    pub async fn refresh(&mut self) -> usize {
        let mut changed = Vec::new();
        for cache in &self.caches {
            for (path, slot) in &cache.files {
                if let CacheSlot::Ready(entry) = slot {
                    let token = FileToken::read(path).await;
                    if token != entry.token {
                        changed.push((cache.specifier.clone(), path.clone(), token.is_none()));
                    }
                }
            }
        }

        for (specifier, path, removed) in &changed {
            self.invalidate(specifier, path, *removed);
        }
        changed.len()
    }

    /// Resolve every specifier and reset its cache to pending files.
    async fn discover(&mut self) -> Result<(), IndexGenerationError> {
        let working_dir = self.options.working_dir.clone();

        for cache in &mut self.caches {
            let files = self.resolver.resolve(&working_dir, &cache.specifier).await?;
            cache.files = files
                .into_iter()
                .map(|path| (path, CacheSlot::Pending))
                .collect();
            debug!(
                specifier = %cache.specifier,
                files = cache.files.len(),
                "Discovered story files"
            );
        }

        self.initialized = true;
        self.mark_stale();
        Ok(())
    }

    async fn build(&mut self) -> Result<Arc<StoryIndex>, IndexGenerationError> {
        self.extract_pending().await?;

        if let Some(index) = &self.index {
            return Ok(Arc::clone(index));
        }

        let mut entries = self.collect_entries()?;
        if entries.is_empty() {
            return Err(IndexGenerationError::EmptyIndex);
        }
        sort_entries(&mut entries, self.options.story_sort.as_ref())?;

        let index = Arc::new(StoryIndex::from_entries(entries));
        info!(entries = index.len(), files = self.file_count(), "Built story index");
        self.index = Some(Arc::clone(&index));
        Ok(index)
    }

    fn mark_stale(&mut self) {
        if let Some(index) = self.index.take() {
            self.previous = Some(index);
        }
    }

    async fn extract_pending(&mut self) -> Result<(), IndexGenerationError> {
        let pending: Vec<(usize, PathBuf)> = self
            .caches
            .iter()
            .enumerate()
            .flat_map(|(i, cache)| {
                cache
                    .files
                    .iter()
                    .filter(|(_, slot)| matches!(slot, CacheSlot::Pending))
                    .map(move |(path, _)| (i, path.clone()))
            })
            .collect();

        if pending.is_empty() {
            return Ok(());
        }
        debug!(files = pending.len(), "Extracting story files");

        let extractor = Arc::clone(&self.extractor);
        let results = join_all(pending.into_iter().map(|(i, path)| {
            let extractor = Arc::clone(&extractor);
            async move {
                let token = FileToken::read(&path).await;
                let result = extractor.extract(&path).await;
                (i, path, token, result)
            }
        }))
        .await;

        let mut failure = None;
        for (i, path, token, result) in results {
            match result {
                Ok(extracted) => {
                    if let Some(slot) = self.caches[i].files.get_mut(&path) {
                        *slot = CacheSlot::Ready(CacheEntry { token, extracted });
                    }
                }
                Err(source) => {
                    if failure.is_none() {
                        failure = Some(IndexGenerationError::Extract { path, source });
                    }
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    fn collect_entries(&self) -> Result<Vec<IndexEntry>, IndexGenerationError> {
        let mut entries = Vec::new();
        let mut owners: HashMap<StoryId, String> = HashMap::new();

        for cache in &self.caches {
            for (path, slot) in &cache.files {
                let CacheSlot::Ready(entry) = slot else {
                    continue;
                };
                let import_path = import_path(&self.options.working_dir, path);
                for story in self.file_entries(&cache.specifier, &import_path, &entry.extracted)? {
                    match owners.get(&story.id) {
                        // Same file already emitted by an earlier specifier.
                        // Collisions inside one file fail in `file_entries`.
                        Some(owner) if *owner == story.import_path => continue,
                        Some(owner) => {
                            return Err(IndexGenerationError::DuplicateId {
                                id: story.id,
                                first: owner.clone(),
                                second: story.import_path,
                            })
                        }
                        None => {
                            owners.insert(story.id.clone(), story.import_path.clone());
                            entries.push(story);
                        }
                    }
                }
            }
        }

        Ok(entries)
    }

    fn file_entries(
        &self,
        specifier: &StorySpecifier,
        import_path: &str,
        extracted: &Extracted,
    ) -> Result<Vec<IndexEntry>, IndexGenerationError> {
        let component = extracted.component.clone().unwrap_or_default();
        let title = user_or_auto_title(specifier, import_path, component.title.as_deref());
        let kind = component.id.as_deref().unwrap_or(&title);
        let docs_only = extracted.stories.len() == 1
            && extracted.stories[0].export_name == self.options.docs_only_export;

        let entries: Vec<IndexEntry> = extracted
            .stories
            .iter()
            .map(|story| {
                let id = match &story.id {
                    Some(id) => StoryId::new(id.as_str()),
                    None => to_id(kind, &story.export_name).map_err(|source| {
                        IndexGenerationError::Id {
                            import_path: import_path.to_string(),
                            source,
                        }
                    })?,
                };

                let mut tags = component.tags.clone();
                for tag in &story.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }

                Ok(IndexEntry {
                    id,
                    name: story
                        .name
                        .clone()
                        .unwrap_or_else(|| story_name_from_export(&story.export_name)),
                    title: title.clone(),
                    import_path: import_path.to_string(),
                    tags,
                    parameters: EntryParameters {
                        docs_only,
                        extra: story.parameters.clone(),
                    },
                })
            })
            .collect::<Result<_, IndexGenerationError>>()?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = entries.iter().find(|entry| !seen.insert(&entry.id)) {
            return Err(IndexGenerationError::DuplicateId {
                id: duplicate.id.clone(),
                first: import_path.to_string(),
                second: import_path.to_string(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ComponentAnnotation, StoryAnnotation};

    fn story(export: &str) -> StoryAnnotation {
        StoryAnnotation {
            export_name: export.to_string(),
            ..Default::default()
        }
    }

    fn generator() -> StoryIndexGenerator {
        StoryIndexGenerator::new(
            vec![StorySpecifier::new("./src", "**/*.stories.*")],
            IndexerOptions::new("/project"),
        )
    }

    #[test]
    fn test_file_entries_derive_ids_names_and_tags() {
        let gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");
        let extracted = Extracted {
            component: Some(ComponentAnnotation {
                title: Some("Example/Button".to_string()),
                id: None,
                tags: vec!["autodocs".to_string()],
            }),
            stories: vec![
                StoryAnnotation {
                    tags: vec!["autodocs".to_string(), "new".to_string()],
                    ..story("primaryButton")
                },
                StoryAnnotation {
                    name: Some("Big one".to_string()),
                    ..story("Large")
                },
            ],
        };

        let entries = gen
            .file_entries(&spec, "./src/Button.stories.ts", &extracted)
            .unwrap();
        assert_eq!(entries[0].id.as_str(), "example-button--primary-button");
        assert_eq!(entries[0].name, "Primary Button");
        assert_eq!(entries[0].tags, vec!["autodocs", "new"]);
        assert_eq!(entries[1].id.as_str(), "example-button--large");
        assert_eq!(entries[1].name, "Big one");
        assert!(!entries[1].is_docs_only());
    }

    #[test]
    fn test_component_id_overrides_title_in_ids() {
        let gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");
        let extracted = Extracted {
            component: Some(ComponentAnnotation {
                title: Some("Example/Button".to_string()),
                id: Some("btn".to_string()),
                tags: vec![],
            }),
            stories: vec![story("Primary")],
        };
        let entries = gen.file_entries(&spec, "./src/B.stories.ts", &extracted).unwrap();
        assert_eq!(entries[0].id.as_str(), "btn--primary");
        assert_eq!(entries[0].title, "Example/Button");
    }

    #[test]
    fn test_docs_only_requires_single_sentinel_story() {
        let gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");

        let alone = Extracted {
            component: None,
            stories: vec![story("__page")],
        };
        let entries = gen.file_entries(&spec, "./src/Intro.stories.mdx", &alone).unwrap();
        assert!(entries[0].is_docs_only());
        assert_eq!(entries[0].id.as_str(), "intro--page");
        assert_eq!(entries[0].name, "Page");

        let shared = Extracted {
            component: None,
            stories: vec![story("__page"), story("Other")],
        };
        let entries = gen.file_entries(&spec, "./src/Intro.stories.mdx", &shared).unwrap();
        assert!(entries.iter().all(|e| !e.is_docs_only()));
    }

    #[test]
    fn test_unsanitizable_title_is_an_id_error() {
        let gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");
        let extracted = Extracted {
            component: Some(ComponentAnnotation {
                title: Some("???".to_string()),
                ..Default::default()
            }),
            stories: vec![story("Primary")],
        };
        let result = gen.file_entries(&spec, "./src/Q.stories.ts", &extracted);
        assert!(matches!(result, Err(IndexGenerationError::Id { .. })));
    }

    #[test]
    fn test_colliding_exports_in_one_file_are_a_duplicate_id() {
        let gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");
        let extracted = Extracted {
            component: Some(ComponentAnnotation {
                title: Some("Button".to_string()),
                ..Default::default()
            }),
            stories: vec![story("Primary"), story("primary_")],
        };
        match gen.file_entries(&spec, "./src/Button.stories.ts", &extracted) {
            Err(IndexGenerationError::DuplicateId { id, first, second }) => {
                assert_eq!(id.as_str(), "button--primary");
                assert_eq!(first, "./src/Button.stories.ts");
                assert_eq!(second, first);
            }
            other => panic!("expected duplicate id error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalidate_ignores_unmatched_new_file() {
        let mut gen = generator();
        let spec = StorySpecifier::new("./src", "**/*.stories.*");
        gen.invalidate(&spec, Path::new("/project/lib/X.stories.ts"), false);
        assert_eq!(gen.file_count(), 0);
        gen.invalidate(&spec, Path::new("/project/src/X.stories.ts"), false);
        assert_eq!(gen.file_count(), 1);
    }
}
