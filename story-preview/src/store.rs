//! The story store: current index, args, globals and prepared stories.

use crate::annotations::{CsfModule, ProjectAnnotations};
use crate::error::PreviewError;
use crate::prepare::{prepare_story, PreparedStory};
use crate::types::{Args, SelectionSpecifier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use story_index::{BoxError, IndexEntry, StoryId, StoryIndex};
use tracing::{debug, warn};

/// Loads a story module by import path.
#[async_trait]
pub trait ModuleImporter: Send + Sync {
    async fn import(&self, import_path: &str) -> Result<Arc<CsfModule>, BoxError>;
}

// ===== Args =====

/// Per-story args. Every mutation is a merge; only a definition change
/// recomputes defaults.
#[derive(Debug, Clone, Default)]
pub struct ArgsStore {
    initial: HashMap<StoryId, Args>,
    current: HashMap<StoryId, Args>,
}

impl ArgsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a story's declared defaults.
    ///
    /// The first call creates the record. A later call with different
    /// defaults keeps every value the user changed from the old defaults.
    pub fn setup(&mut self, id: &StoryId, initial: &Args) {
        let previous = self.initial.insert(id.clone(), initial.clone());
        match (previous, self.current.get(id)) {
            (None, None) => {
                self.current.insert(id.clone(), initial.clone());
            }
            // Args recorded before the story was ever loaded.
            (None, Some(current)) => {
                let mut merged = initial.clone();
                merged.extend(current.clone());
                self.current.insert(id.clone(), merged);
            }
            (Some(old), Some(current)) if old != *initial => {
                let mut merged = initial.clone();
                for (key, value) in current {
                    if old.get(key) != Some(value) {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                debug!(story_id = %id, "Story defaults changed, kept user args");
                self.current.insert(id.clone(), merged);
            }
            _ => {}
        }
    }

    pub fn get(&self, id: &str) -> Option<&Args> {
        self.current.get(id)
    }

    pub fn initial(&self, id: &str) -> Option<&Args> {
        self.initial.get(id)
    }

    /// Merge `patch` into the story's args and return the result.
    pub fn update(&mut self, id: &StoryId, patch: &Args) -> Args {
        let current = self.current.entry(id.clone()).or_default();
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        current.clone()
    }

    /// Restore `names` (or everything, when `None`) to the declared
    /// defaults. Names without a default are removed. Other args are kept.
    pub fn reset(&mut self, id: &StoryId, names: Option<&[String]>) -> Args {
        let initial = self.initial.get(id).cloned().unwrap_or_default();
        let current = self.current.entry(id.clone()).or_default();
        match names {
            None => *current = initial,
            Some(names) => {
                for name in names {
                    match initial.get(name) {
                        Some(value) => {
                            current.insert(name.clone(), value.clone());
                        }
                        None => {
                            current.remove(name);
                        }
                    }
                }
            }
        }
        current.clone()
    }
}

// ===== Globals =====

/// The globals shared by every story.
#[derive(Debug, Clone, Default)]
pub struct GlobalsStore {
    allowed: Vec<String>,
    initial: Args,
    current: Args,
}

impl GlobalsStore {
    pub fn new(initial: Args, allowed: Vec<String>) -> Self {
        Self {
            allowed,
            current: initial.clone(),
            initial,
        }
    }

    /// Replace the declared globals, keeping current values that are still
    /// allowed.
    pub fn set_initial(&mut self, initial: Args, allowed: Vec<String>) {
        let mut current = initial.clone();
        for (key, value) in &self.current {
            if allowed.is_empty() || allowed.contains(key) {
                current.insert(key.clone(), value.clone());
            }
        }
        self.allowed = allowed;
        self.initial = initial;
        self.current = current;
    }

    pub fn get(&self) -> &Args {
        &self.current
    }

    pub fn initial(&self) -> &Args {
        &self.initial
    }

    /// Whether `name` may be set from outside (URL). Everything is allowed
    /// when no global names are declared.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|n| n == name)
    }

    /// Merge `patch` and return the result.
    pub fn update(&mut self, patch: &Args) -> Args {
        for (key, value) in patch {
            self.current.insert(key.clone(), value.clone());
        }
        self.current.clone()
    }
}

// ===== Story store =====

/// Owns the index, the args and globals records and the module caches.
pub struct StoryStore {
    index: Arc<StoryIndex>,
    project: Arc<ProjectAnnotations>,
    pub args: ArgsStore,
    pub globals: GlobalsStore,
    modules: HashMap<String, Arc<CsfModule>>,
    prepared: HashMap<StoryId, Arc<PreparedStory>>,
}

impl StoryStore {
    pub fn new(project: Arc<ProjectAnnotations>, index: Arc<StoryIndex>) -> Self {
        let globals = GlobalsStore::new(
            project.initial_globals.clone(),
            project.global_types.clone(),
        );
        Self {
            index,
            project,
            args: ArgsStore::new(),
            globals,
            modules: HashMap::new(),
            prepared: HashMap::new(),
        }
    }

    pub fn index(&self) -> &Arc<StoryIndex> {
        &self.index
    }

    pub fn project(&self) -> &Arc<ProjectAnnotations> {
        &self.project
    }

    /// Swap project annotations. Prepared stories are discarded; args survive.
    pub fn set_project(&mut self, project: Arc<ProjectAnnotations>) {
        self.globals.set_initial(
            project.initial_globals.clone(),
            project.global_types.clone(),
        );
        self.project = project;
        self.prepared.clear();
    }

    /// Swap the index. Every module is imported again on next use.
    pub fn set_index(&mut self, index: Arc<StoryIndex>) {
        self.index = index;
        self.modules.clear();
        self.prepared.clear();
    }

    pub fn entry(&self, id: &str) -> Result<&IndexEntry, PreviewError> {
        self.index
            .get(id)
            .ok_or_else(|| PreviewError::StoryMissing(id.to_string()))
    }

    /// Resolve a specifier against the current index.
    pub fn resolve(&self, specifier: &SelectionSpecifier) -> Option<StoryId> {
        let found = match specifier {
            SelectionSpecifier::Any => self.index.first(),
            SelectionSpecifier::Id(id) => self
                .index
                .get(id)
                .or_else(|| self.index.entries().find(|e| e.id.as_str().starts_with(id.as_str()))),
            SelectionSpecifier::TitleAndName { title, name } => self
                .index
                .entries()
                .find(|e| e.title == *title && e.name == *name),
        };
        found.map(|e| e.id.clone())
    }

    /// The prepared story, if it was loaded since the last index change.
    pub fn prepared(&self, id: &str) -> Option<Arc<PreparedStory>> {
        self.prepared.get(id).cloned()
    }

    /// Import (or reuse) the story's module, prepare the story and register
    /// its default args.
    pub async fn load_story(
        &mut self,
        id: &str,
        importer: &dyn ModuleImporter,
    ) -> Result<Arc<PreparedStory>, PreviewError> {
        if let Some(story) = self.prepared.get(id) {
            return Ok(Arc::clone(story));
        }

        let entry = self.entry(id)?.clone();
        let module = match self.modules.get(&entry.import_path) {
            Some(module) => Arc::clone(module),
            None => {
                debug!(import_path = %entry.import_path, "Importing story module");
                let module = importer.import(&entry.import_path).await.map_err(|source| {
                    PreviewError::Import {
                        import_path: entry.import_path.clone(),
                        source,
                    }
                })?;
                self.modules
                    .insert(entry.import_path.clone(), Arc::clone(&module));
                module
            }
        };

        let story = Arc::new(prepare_story(&entry, &module, &self.project)?);
        self.args.setup(&story.id, &story.initial_args);
        self.prepared.insert(story.id.clone(), Arc::clone(&story));
        Ok(story)
    }

    /// Keep only the globals the project declares, warning about the rest.
    pub fn allowed_globals(&self, globals: &Args) -> Args {
        globals
            .iter()
            .filter(|(key, _)| {
                let allowed = self.globals.is_allowed(key);
                if !allowed {
                    warn!(global = %key, "Ignoring undeclared global");
                }
                allowed
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
