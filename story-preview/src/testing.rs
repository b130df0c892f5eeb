//! In-memory boundaries for driving a [`Preview`](crate::Preview) without a
//! display: a recording view and adapter, a static module importer and
//! index source, and a gate for holding loaders or play functions open.

use crate::annotations::CsfModule;
use crate::channel::ChannelEvent;
use crate::preview::IndexSource;
use crate::render::{ErrorDisplay, PreviewView, RenderAdapter, RenderContext};
use crate::store::ModuleImporter;
use crate::types::Args;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use story_index::{BoxError, EntryParameters, IndexEntry, StoryId, StoryIndex};
use tokio::sync::{broadcast, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===== View =====

/// One call made on a [`RecordingView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Main,
    PreparingStory,
    NoPreview,
    Error(ErrorDisplay),
    Reload,
}

/// A view that records every call.
#[derive(Debug, Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ViewEvent> {
        lock(&self.events).clone()
    }

    pub fn reload_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| **e == ViewEvent::Reload)
            .count()
    }

    pub fn last_error(&self) -> Option<ErrorDisplay> {
        lock(&self.events).iter().rev().find_map(|e| match e {
            ViewEvent::Error(display) => Some(display.clone()),
            _ => None,
        })
    }

    fn push(&self, event: ViewEvent) {
        lock(&self.events).push(event);
    }
}

impl PreviewView for RecordingView {
    fn show_main(&self) {
        self.push(ViewEvent::Main);
    }

    fn show_preparing_story(&self) {
        self.push(ViewEvent::PreparingStory);
    }

    fn show_no_preview(&self) {
        self.push(ViewEvent::NoPreview);
    }

    fn show_error(&self, error: &ErrorDisplay) {
        self.push(ViewEvent::Error(error.clone()));
    }

    fn reload(&self) {
        self.push(ViewEvent::Reload);
    }
}

// ===== Adapter =====

/// One mount performed by a [`RecordingAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCall {
    pub generation: u64,
    pub story_id: StoryId,
    pub args: Args,
    pub globals: Args,
    pub loaded: serde_json::Map<String, Value>,
    pub force_remount: bool,
    /// What the decorated story rendered to.
    pub output: Value,
}

/// An adapter that renders the story, records the output and shows it.
/// Story errors are reported as exceptions.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<RenderCall>>,
    failure: Mutex<Option<String>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following mount fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, story_id: &str) -> Vec<RenderCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.story_id.as_str() == story_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RenderAdapter for RecordingAdapter {
    async fn render_to_dom(
        &self,
        context: &RenderContext,
        _mount_target: &str,
    ) -> Result<(), BoxError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(message.into());
        }

        let output = match context.render_story() {
            Ok(output) => output,
            Err(e) => {
                context.show_exception(&*e);
                Value::Null
            }
        };
        let story = &context.story_context;
        lock(&self.calls).push(RenderCall {
            generation: context.generation,
            story_id: story.id.clone(),
            args: story.args.clone(),
            globals: story.globals.clone(),
            loaded: story.loaded.clone(),
            force_remount: context.force_remount,
            output,
        });
        context.show_main();
        Ok(())
    }
}

// ===== Modules and index =====

/// Serves modules from memory and counts imports per path.
#[derive(Debug, Default)]
pub struct StaticImporter {
    modules: Mutex<HashMap<String, Arc<CsfModule>>>,
    imports: Mutex<HashMap<String, usize>>,
}

impl StaticImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, import_path: impl Into<String>, module: CsfModule) -> Self {
        self.insert(import_path, module);
        self
    }

    /// Add or replace the module at `import_path`.
    pub fn insert(&self, import_path: impl Into<String>, module: CsfModule) {
        lock(&self.modules).insert(import_path.into(), Arc::new(module));
    }

    pub fn import_count(&self, import_path: &str) -> usize {
        lock(&self.imports).get(import_path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleImporter for StaticImporter {
    async fn import(&self, import_path: &str) -> Result<Arc<CsfModule>, BoxError> {
        *lock(&self.imports).entry(import_path.to_string()).or_default() += 1;
        lock(&self.modules)
            .get(import_path)
            .cloned()
            .ok_or_else(|| format!("No module at '{import_path}'").into())
    }
}

/// Serves a fixed index, or an error when none is set.
#[derive(Debug, Default)]
pub struct StaticIndexSource {
    index: Mutex<Option<StoryIndex>>,
}

impl StaticIndexSource {
    pub fn new(index: StoryIndex) -> Self {
        Self {
            index: Mutex::new(Some(index)),
        }
    }

    /// A source whose every fetch fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, index: StoryIndex) {
        *lock(&self.index) = Some(index);
    }
}

#[async_trait]
impl IndexSource for StaticIndexSource {
    async fn fetch_index(&self) -> Result<StoryIndex, BoxError> {
        lock(&self.index)
            .clone()
            .ok_or_else(|| "Story index unavailable".into())
    }
}

/// An index entry with no tags or parameters.
pub fn entry(id: &str, title: &str, name: &str, import_path: &str) -> IndexEntry {
    IndexEntry {
        id: StoryId::from(id),
        name: name.to_string(),
        title: title.to_string(),
        import_path: import_path.to_string(),
        tags: Vec::new(),
        parameters: EntryParameters::default(),
    }
}

// ===== Synchronization =====

/// A one-shot barrier. Everything waiting on it resumes once it is opened.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Every event currently buffered on `events`.
pub fn drain(events: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

/// Names of every buffered event, in order.
pub fn drain_names(events: &mut broadcast::Receiver<ChannelEvent>) -> Vec<&'static str> {
    drain(events).iter().map(ChannelEvent::name).collect()
}
