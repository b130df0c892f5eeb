//! User-supplied story definitions: project, component and story annotations.
//!
//! Stories are plain data plus shared function handles. Composition happens
//! once, when a story is prepared, and never mutates these definitions.

use crate::types::{Args, ViewMode};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use story_index::{BoxError, StoryId};
use tokio::sync::watch;

/// Renders a story to a framework-neutral element description.
pub type StoryFn = Arc<dyn Fn(&StoryContext) -> Result<Value, BoxError> + Send + Sync>;

/// Wraps a story function. Receives the inner function and the context.
pub type Decorator =
    Arc<dyn Fn(StoryFn, &StoryContext) -> Result<Value, BoxError> + Send + Sync>;

/// Loads data before rendering. The result is merged into `StoryContext::loaded`.
pub type Loader =
    Arc<dyn Fn(StoryContext) -> BoxFuture<'static, Result<Map<String, Value>, BoxError>> + Send + Sync>;

/// Interaction script run after a story is mounted.
pub type PlayFunction =
    Arc<dyn Fn(StoryContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// ===== Abort signal =====

/// Cooperative cancellation flag for one render attempt.
#[derive(Debug, Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

impl AbortSignal {
    /// A signal paired with the sender that triggers it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the render attempt is aborted. Never resolves if the
    /// sending side is gone without having aborted.
    pub async fn aborted(&self) {
        let mut rx = self.0.clone();
        let fired = rx.wait_for(|aborted| *aborted).await.map(|_| ());
        if fired.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ===== Story context =====

/// Everything a story, decorator, loader or play function sees.
#[derive(Clone)]
pub struct StoryContext {
    pub id: StoryId,
    pub name: String,
    pub title: String,
    pub tags: Vec<String>,
    pub view_mode: ViewMode,
    pub args: Args,
    pub initial_args: Args,
    pub globals: Args,
    pub parameters: Arc<Map<String, Value>>,
    /// Merged loader results; empty until loaders have run.
    pub loaded: Map<String, Value>,
    pub abort: AbortSignal,
}

impl fmt::Debug for StoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryContext")
            .field("id", &self.id)
            .field("view_mode", &self.view_mode)
            .field("args", &self.args)
            .field("globals", &self.globals)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

// ===== Annotations =====

/// Project-wide annotations applied to every story.
#[derive(Clone, Default)]
pub struct ProjectAnnotations {
    pub decorators: Vec<Decorator>,
    pub loaders: Vec<Loader>,
    pub parameters: Map<String, Value>,
    pub initial_globals: Args,
    /// Global names declared by the project (toolbars, addons); URL globals
    /// outside this set are ignored when the set is non-empty.
    pub global_types: Vec<String>,
    /// Default render function for stories without one.
    pub render: Option<StoryFn>,
}

impl ProjectAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decorator(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_initial_global(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !self.global_types.contains(&key) {
            self.global_types.push(key.clone());
        }
        self.initial_globals.insert(key, value);
        self
    }

    pub fn with_render(mut self, render: StoryFn) -> Self {
        self.render = Some(render);
        self
    }
}

impl fmt::Debug for ProjectAnnotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectAnnotations")
            .field("decorators", &self.decorators.len())
            .field("loaders", &self.loaders.len())
            .field("parameters", &self.parameters)
            .field("initial_globals", &self.initial_globals)
            .finish_non_exhaustive()
    }
}

/// The default export of a story module.
#[derive(Clone, Default)]
pub struct ComponentMeta {
    pub title: Option<String>,
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub args: Args,
    pub parameters: Map<String, Value>,
    pub decorators: Vec<Decorator>,
    pub loaders: Vec<Loader>,
    pub render: Option<StoryFn>,
}

impl ComponentMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_decorator(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_render(mut self, render: StoryFn) -> Self {
        self.render = Some(render);
        self
    }
}

/// One named story export.
#[derive(Clone, Default)]
pub struct StoryDef {
    pub export_name: String,
    pub name: Option<String>,
    /// Explicit id, overriding the derived one.
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub args: Args,
    pub parameters: Map<String, Value>,
    pub decorators: Vec<Decorator>,
    pub loaders: Vec<Loader>,
    pub render: Option<StoryFn>,
    pub play: Option<PlayFunction>,
}

impl StoryDef {
    pub fn new(export_name: impl Into<String>) -> Self {
        Self {
            export_name: export_name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_decorator(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_render(mut self, render: StoryFn) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_play(mut self, play: PlayFunction) -> Self {
        self.play = Some(play);
        self
    }
}

/// An imported story module.
#[derive(Clone, Default)]
pub struct CsfModule {
    /// Content signature; equal signatures mean an unchanged module.
    pub signature: String,
    pub meta: ComponentMeta,
    pub stories: Vec<StoryDef>,
}

impl CsfModule {
    pub fn new(signature: impl Into<String>, meta: ComponentMeta) -> Self {
        Self {
            signature: signature.into(),
            meta,
            stories: Vec::new(),
        }
    }

    pub fn with_story(mut self, story: StoryDef) -> Self {
        self.stories.push(story);
        self
    }
}

impl fmt::Debug for CsfModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsfModule")
            .field("signature", &self.signature)
            .field("title", &self.meta.title)
            .field(
                "stories",
                &self.stories.iter().map(|s| &s.export_name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ===== Constructors =====

/// Wrap a closure as a [`StoryFn`].
pub fn story_fn<F>(f: F) -> StoryFn
where
    F: Fn(&StoryContext) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Decorator`].
pub fn decorator<F>(f: F) -> Decorator
where
    F: Fn(StoryFn, &StoryContext) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a [`Loader`].
pub fn loader<F, Fut>(f: F) -> Loader
where
    F: Fn(StoryContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Map<String, Value>, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Wrap an async closure as a [`PlayFunction`].
pub fn play<F, Fut>(f: F) -> PlayFunction
where
    F: Fn(StoryContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_signal() {
        let (tx, signal) = AbortSignal::channel();
        assert!(!signal.is_aborted());
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.aborted().await });
        tx.send_replace(true);
        handle.await.unwrap();
        assert!(signal.is_aborted());
    }

    #[test]
    fn test_initial_global_declares_type() {
        let project = ProjectAnnotations::new()
            .with_initial_global("theme", Value::from("light"))
            .with_initial_global("theme", Value::from("dark"));
        assert_eq!(project.global_types, vec!["theme"]);
        assert_eq!(project.initial_globals["theme"], "dark");
    }
}
