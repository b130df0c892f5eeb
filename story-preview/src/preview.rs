//! The preview render engine.
//!
//! [`Preview`] turns selections and live mutations into render attempts.
//! Every event that changes what should be on screen starts a new
//! generation; older attempts notice at their next checkpoint and stop
//! without touching the display. Handlers are serialized behind one lock,
//! so the index, the args and globals and the generation counter have a
//! single writer.

use crate::annotations::{AbortSignal, ProjectAnnotations};
use crate::channel::{Channel, ChannelEvent};
use crate::error::PreviewError;
use crate::prepare::PreparedStory;
use crate::render::{ErrorDisplay, PreviewView, RenderAdapter, RenderJob, Renderer};
use crate::store::{ModuleImporter, StoryStore};
use crate::types::{Args, RenderPhase, Selection, SelectionSpecifier, ViewMode};
use crate::url::{parse_url, UrlState};
use async_trait::async_trait;
use std::sync::Arc;
use story_index::{BoxError, StoryId, StoryIndex};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default element id the story is mounted into.
pub const DEFAULT_MOUNT_TARGET: &str = "#storybook-root";

/// Scheduler ticks a playing render gets to stop after an abort.
pub const DEFAULT_ABORT_TICK_BUDGET: usize = 3;

// ===== Configuration =====

/// Configuration for a [`Preview`].
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Where the adapter mounts stories.
    pub mount_target: String,

    /// Ticks to wait for an aborted play function before reloading.
    pub abort_tick_budget: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewConfig {
    pub fn new() -> Self {
        Self {
            mount_target: DEFAULT_MOUNT_TARGET.to_string(),
            abort_tick_budget: DEFAULT_ABORT_TICK_BUDGET,
        }
    }

    pub fn with_mount_target(mut self, target: impl Into<String>) -> Self {
        self.mount_target = target.into();
        self
    }

    pub fn with_abort_tick_budget(mut self, ticks: usize) -> Self {
        self.abort_tick_budget = ticks;
        self
    }
}

/// Supplies the current story index.
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn fetch_index(&self) -> Result<StoryIndex, BoxError>;
}

// ===== State =====

/// The latest render attempt.
struct RenderHandle {
    generation: u64,
    story_id: Option<StoryId>,
    abort: watch::Sender<bool>,
    phase: watch::Receiver<RenderPhase>,
}

struct State {
    store: Option<StoryStore>,
    importer: Arc<dyn ModuleImporter>,
    selection: Option<Selection>,
    /// Story the display currently belongs to.
    rendered: Option<StoryId>,
    /// Initial URL, kept so a fixed configuration can finish initializing.
    url: Option<UrlState>,
    /// Set while project annotations are broken; events are ignored.
    config_error: Option<String>,
    reloading: bool,
    current: Option<RenderHandle>,
}

// ===== Preview =====

/// The preview render engine.
pub struct Preview {
    config: PreviewConfig,
    renderer: Arc<Renderer>,
    index_source: Arc<dyn IndexSource>,
    state: Mutex<State>,
}

impl Preview {
    pub fn new(
        config: PreviewConfig,
        channel: Channel,
        adapter: Arc<dyn RenderAdapter>,
        view: Arc<dyn PreviewView>,
        importer: Arc<dyn ModuleImporter>,
        index_source: Arc<dyn IndexSource>,
    ) -> Self {
        let renderer = Arc::new(Renderer::new(
            channel,
            adapter,
            view,
            config.mount_target.clone(),
        ));
        Self {
            config,
            renderer,
            index_source,
            state: Mutex::new(State {
                store: None,
                importer,
                selection: None,
                rendered: None,
                url: None,
                config_error: None,
                reloading: false,
                current: None,
            }),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn channel(&self) -> &Channel {
        &self.renderer.channel
    }

    // ===== Initialization =====

    /// Load project annotations and the index, resolve the URL selection and
    /// render it.
    pub async fn initialize(
        &self,
        url: &str,
        project: Result<ProjectAnnotations, BoxError>,
    ) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        state.url = Some(parse_url(url));
        self.initialize_with(&mut state, project).await
    }

    /// Apply new project annotations, e.g. after the project file changed.
    /// Also completes an initialization that failed on configuration.
    pub async fn on_project_annotations_changed(
        &self,
        project: Result<ProjectAnnotations, BoxError>,
    ) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        if state.reloading {
            return Err(PreviewError::ReloadRequired);
        }
        if state.store.is_none() {
            return self.initialize_with(&mut state, project).await;
        }

        let project = match project {
            Ok(project) => project,
            Err(e) => return Err(self.config_error(&mut state, e)),
        };
        state.config_error = None;
        if let Some(store) = state.store.as_mut() {
            store.set_project(Arc::new(project));
        }
        info!("Project annotations changed");
        self.render_selection(&mut state, true).await
    }

    async fn initialize_with(
        &self,
        state: &mut State,
        project: Result<ProjectAnnotations, BoxError>,
    ) -> Result<(), PreviewError> {
        let project = match project {
            Ok(project) => project,
            Err(e) => return Err(self.config_error(state, e)),
        };
        state.config_error = None;

        let index = match self.index_source.fetch_index().await {
            Ok(index) => index,
            Err(e) => {
                let error = PreviewError::Index(e);
                self.renderer.view.show_error(&ErrorDisplay::from(&error));
                return Err(error);
            }
        };

        let mut store = StoryStore::new(Arc::new(project), Arc::new(index));
        let url = state.url.clone().unwrap_or_default();

        let url_globals = store.allowed_globals(&url.globals);
        store.globals.update(&url_globals);
        self.renderer.channel.emit(ChannelEvent::SetGlobals {
            globals: store.globals.get().clone(),
        });
        info!(entries = store.index().len(), "Preview initialized");

        let specifier = url.specifier_or_any();
        let resolved = store.resolve(&specifier);
        state.store = Some(store);

        let Some(story_id) = resolved else {
            return Err(self.story_missing(state, Some(specifier.to_string())).await);
        };

        let view_mode = url.view_mode_or_default();
        self.renderer.channel.emit(ChannelEvent::StorySpecified {
            story_id: story_id.clone(),
            view_mode,
        });
        if let Some(store) = state.store.as_mut() {
            if !url.args.is_empty() {
                store.args.update(&story_id, &url.args);
            }
        }
        state.selection = Some(Selection::new(story_id, view_mode));
        self.render_selection(state, true).await
    }

    fn config_error(&self, state: &mut State, error: BoxError) -> PreviewError {
        let error = PreviewError::Config(error.to_string());
        let message = error.to_string();
        error!(error = %message, "Failed to load project annotations");
        if state.config_error.as_deref() != Some(message.as_str()) {
            self.renderer.view.show_error(&ErrorDisplay::from(&error));
            self.renderer.channel.emit(ChannelEvent::ConfigError { message: message.clone() });
        }
        state.config_error = Some(message);
        error
    }

    // ===== Operations =====

    /// Select a story. Always starts a new generation.
    pub async fn select_story(&self, selection: Selection) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;

        let known = state
            .store
            .as_ref()
            .is_some_and(|store| store.index().contains(selection.story_id.as_str()));
        if !known {
            state.selection = Some(selection.clone());
            return Err(self
                .story_missing(&mut state, Some(selection.story_id.to_string()))
                .await);
        }

        debug!(story_id = %selection.story_id, view_mode = %selection.view_mode, "Story selected");
        state.selection = Some(selection);
        self.render_selection(&mut state, true).await
    }

    /// Resolve a specifier against the current index and select the result.
    pub async fn select_specifier(
        &self,
        specifier: &SelectionSpecifier,
        view_mode: ViewMode,
    ) -> Result<(), PreviewError> {
        let resolved = {
            let state = self.state.lock().await;
            self.ensure_ready(&state)?;
            state.store.as_ref().and_then(|store| store.resolve(specifier))
        };
        match resolved {
            Some(story_id) => self.select_story(Selection::new(story_id, view_mode)).await,
            None => {
                let mut state = self.state.lock().await;
                Err(self.story_missing(&mut state, Some(specifier.to_string())).await)
            }
        }
    }

    /// Merge `patch` into a story's args. Re-renders (without remounting)
    /// when that story is on screen.
    pub async fn update_args(&self, story_id: &StoryId, patch: &Args) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        let Some(store) = state.store.as_mut() else {
            return Err(PreviewError::NotInitialized);
        };
        let args = store.args.update(story_id, patch);
        self.after_args_change(&mut state, story_id, args).await
    }

    /// Reset the named args (all args when `None`) to their defaults.
    pub async fn reset_args(
        &self,
        story_id: &StoryId,
        arg_names: Option<&[String]>,
    ) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        let Some(store) = state.store.as_mut() else {
            return Err(PreviewError::NotInitialized);
        };
        let args = store.args.reset(story_id, arg_names);
        self.after_args_change(&mut state, story_id, args).await
    }

    async fn after_args_change(
        &self,
        state: &mut State,
        story_id: &StoryId,
        args: Args,
    ) -> Result<(), PreviewError> {
        self.renderer.channel.emit(ChannelEvent::StoryArgsUpdated {
            story_id: story_id.clone(),
            args,
        });
        if self.is_selected(state, story_id) {
            self.render_selection(state, false).await
        } else {
            debug!(story_id = %story_id, "Recorded args for a story that is not on screen");
            Ok(())
        }
    }

    /// Merge `patch` into the globals and re-render the current story.
    /// Loaders always run again.
    pub async fn update_globals(&self, patch: &Args) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        let Some(store) = state.store.as_mut() else {
            return Err(PreviewError::NotInitialized);
        };
        let globals = store.globals.update(patch);
        let initial_globals = store.globals.initial().clone();
        self.renderer.channel.emit(ChannelEvent::GlobalsUpdated {
            globals,
            initial_globals,
        });
        self.render_selection(&mut state, false).await
    }

    /// Destroy and recreate the mount of the selected story, running loaders
    /// and the play function again.
    pub async fn force_remount(&self, story_id: &StoryId) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        if !self.is_selected(&state, story_id) {
            debug!(story_id = %story_id, "Ignoring remount for a story that is not selected");
            return Ok(());
        }
        self.render_selection(&mut state, true).await
    }

    /// Render the current story again in place.
    pub async fn force_re_render(&self) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        self.render_selection(&mut state, false).await
    }

    /// Swap in a new index, and optionally a new module importer.
    ///
    /// The selected story is re-imported. If neither its import path nor its
    /// module signature changed, `STORY_UNCHANGED` is emitted instead of a
    /// render.
    pub async fn on_index_changed(
        &self,
        index: StoryIndex,
        importer: Option<Arc<dyn ModuleImporter>>,
    ) -> Result<(), PreviewError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&state)?;
        if let Some(importer) = importer {
            state.importer = importer;
        }

        let selection = state.selection.clone();
        let Some(store) = state.store.as_mut() else {
            return Err(PreviewError::NotInitialized);
        };
        let previous = selection
            .as_ref()
            .and_then(|s| store.prepared(s.story_id.as_str()));
        store.set_index(Arc::new(index));
        info!(entries = store.index().len(), "Story index changed");

        let Some(selection) = selection else {
            return self.retry_url_selection(&mut state).await;
        };
        if !store.index().contains(selection.story_id.as_str()) {
            return Err(self
                .story_missing(&mut state, Some(selection.story_id.to_string()))
                .await);
        }
        if !selection.view_mode.renders_story() {
            return Ok(());
        }

        let story = match self.load_selected(&mut state, &selection.story_id).await {
            Ok(story) => story,
            Err(e) => return Err(self.render_failure(&mut state, &selection.story_id, e).await),
        };

        let unchanged = previous.is_some_and(|old| {
            old.import_path == story.import_path && old.module_signature == story.module_signature
        });
        if unchanged && state.rendered.as_ref() == Some(&selection.story_id) {
            debug!(story_id = %selection.story_id, "Selected story unchanged");
            self.renderer.channel.emit(ChannelEvent::StoryUnchanged {
                story_id: selection.story_id,
            });
            return Ok(());
        }

        self.start_render(&mut state, story, selection.view_mode, true)
            .await
    }

    /// Fetch the index again and apply it.
    pub async fn on_index_invalidated(&self) -> Result<(), PreviewError> {
        let index = self
            .index_source
            .fetch_index()
            .await
            .map_err(PreviewError::Index)?;
        self.on_index_changed(index, None).await
    }

    /// Dispatch one incoming channel event. Outgoing events are ignored.
    pub async fn handle_event(&self, event: ChannelEvent) -> Result<(), PreviewError> {
        match event {
            ChannelEvent::SetCurrentStory {
                story_id,
                view_mode,
            } => self.select_story(Selection::new(story_id, view_mode)).await,
            ChannelEvent::UpdateStoryArgs { story_id, patch } => {
                self.update_args(&story_id, &patch).await
            }
            ChannelEvent::ResetStoryArgs {
                story_id,
                arg_names,
            } => self.reset_args(&story_id, arg_names.as_deref()).await,
            ChannelEvent::UpdateGlobals { patch } => self.update_globals(&patch).await,
            ChannelEvent::ForceReRender {} => self.force_re_render().await,
            ChannelEvent::ForceRemount { story_id } => self.force_remount(&story_id).await,
            ChannelEvent::StoryIndexInvalidated {} => self.on_index_invalidated().await,
            _ => Ok(()),
        }
    }

    /// Handle incoming channel events in arrival order until the channel closes.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let preview = Arc::clone(self);
        let mut events = preview.renderer.channel.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_incoming() => {
                        let name = event.name();
                        if let Err(e) = preview.handle_event(event).await {
                            warn!(event = name, error = %e, "Failed to handle channel event");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Preview listener lagged behind the channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ===== Inspection =====

    pub async fn selection(&self) -> Option<Selection> {
        self.state.lock().await.selection.clone()
    }

    pub async fn args(&self, story_id: &str) -> Option<Args> {
        let state = self.state.lock().await;
        state.store.as_ref()?.args.get(story_id).cloned()
    }

    pub async fn globals(&self) -> Option<Args> {
        let state = self.state.lock().await;
        state.store.as_ref().map(|store| store.globals.get().clone())
    }

    pub fn current_generation(&self) -> u64 {
        self.renderer.current_generation()
    }

    /// Phase of the latest render attempt.
    pub async fn phase(&self) -> Option<RenderPhase> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|handle| *handle.phase.borrow())
    }

    /// Wait until the latest render attempt reaches a terminal phase and no
    /// newer one has started meanwhile.
    pub async fn wait_for_render(&self) -> Option<RenderPhase> {
        loop {
            let (generation, mut phase) = {
                let state = self.state.lock().await;
                let handle = state.current.as_ref()?;
                (handle.generation, handle.phase.clone())
            };
            let reached = match phase.wait_for(|p| p.is_terminal()).await {
                Ok(reached) => Some(*reached),
                Err(_) => None,
            };
            let reached = reached.unwrap_or_else(|| *phase.borrow());
            let state = self.state.lock().await;
            if state.current.as_ref().map(|h| h.generation) == Some(generation) {
                return Some(reached);
            }
        }
    }

    // ===== Internals =====

    fn ensure_ready(&self, state: &State) -> Result<(), PreviewError> {
        if state.reloading {
            return Err(PreviewError::ReloadRequired);
        }
        if let Some(message) = &state.config_error {
            debug!("Ignoring event while project annotations are broken");
            return Err(PreviewError::Config(message.clone()));
        }
        if state.store.is_none() {
            return Err(PreviewError::NotInitialized);
        }
        Ok(())
    }

    fn is_selected(&self, state: &State, story_id: &StoryId) -> bool {
        state
            .selection
            .as_ref()
            .is_some_and(|s| s.story_id == *story_id)
    }

    async fn retry_url_selection(&self, state: &mut State) -> Result<(), PreviewError> {
        let Some(url) = state.url.clone() else {
            return Ok(());
        };
        let specifier = url.specifier_or_any();
        let Some(story_id) = state.store.as_ref().and_then(|s| s.resolve(&specifier)) else {
            return Ok(());
        };
        self.renderer.channel.emit(ChannelEvent::StorySpecified {
            story_id: story_id.clone(),
            view_mode: url.view_mode_or_default(),
        });
        state.selection = Some(Selection::new(story_id, url.view_mode_or_default()));
        self.render_selection(state, true).await
    }

    async fn load_selected(
        &self,
        state: &mut State,
        story_id: &StoryId,
    ) -> Result<Arc<PreparedStory>, PreviewError> {
        let importer = Arc::clone(&state.importer);
        let store = state.store.as_mut().ok_or(PreviewError::NotInitialized)?;
        store.load_story(story_id.as_str(), importer.as_ref()).await
    }

    /// Render the selection. A different story than the one on screen is
    /// always remounted.
    async fn render_selection(
        &self,
        state: &mut State,
        force_remount: bool,
    ) -> Result<(), PreviewError> {
        let Some(selection) = state.selection.clone() else {
            return Ok(());
        };

        if !selection.view_mode.renders_story() {
            self.supersede(state).await?;
            state.current = None;
            state.rendered = None;
            self.renderer.view.show_no_preview();
            return Ok(());
        }

        let story = match self.load_selected(state, &selection.story_id).await {
            Ok(story) => story,
            Err(PreviewError::StoryMissing(id)) => {
                return Err(self.story_missing(state, Some(id)).await);
            }
            Err(e) => return Err(self.render_failure(state, &selection.story_id, e).await),
        };

        self.start_render(state, story, selection.view_mode, force_remount)
            .await
    }

    async fn start_render(
        &self,
        state: &mut State,
        story: Arc<PreparedStory>,
        view_mode: ViewMode,
        force_remount: bool,
    ) -> Result<(), PreviewError> {
        let new_story = state.rendered.as_ref() != Some(&story.id);
        let force_remount = force_remount || new_story;

        let generation = self.supersede(state).await?;

        let Some(store) = state.store.as_ref() else {
            return Err(PreviewError::NotInitialized);
        };
        let args = store.args.get(story.id.as_str()).cloned().unwrap_or_default();
        let globals = store.globals.get().clone();

        if new_story {
            self.renderer.channel.emit(ChannelEvent::StoryPrepared {
                id: story.id.clone(),
                parameters: story.parameters.as_ref().clone(),
                initial_args: story.initial_args.clone(),
                args: args.clone(),
            });
        }
        if force_remount {
            self.renderer.view.show_preparing_story();
        }

        let (abort_tx, abort) = AbortSignal::channel();
        let (phase_tx, phase_rx) = watch::channel(RenderPhase::Preparing);
        self.renderer.channel.emit(ChannelEvent::StoryRenderPhaseChanged {
            story_id: story.id.clone(),
            new_phase: RenderPhase::Preparing,
        });
        debug!(story_id = %story.id, generation, force_remount, "Starting render");

        state.rendered = Some(story.id.clone());
        state.current = Some(RenderHandle {
            generation,
            story_id: Some(story.id.clone()),
            abort: abort_tx,
            phase: phase_rx,
        });

        let job = RenderJob {
            generation,
            story,
            args,
            globals,
            view_mode,
            force_remount,
            abort,
            phase: phase_tx,
        };
        tokio::spawn(Arc::clone(&self.renderer).run(job));
        Ok(())
    }

    /// Start a new generation and stop the previous render attempt.
    ///
    /// A play function that is still running after the tick budget means the
    /// attempt cannot be stopped; the view is reloaded and the engine stops
    /// accepting events.
    async fn supersede(&self, state: &mut State) -> Result<u64, PreviewError> {
        let generation = self.renderer.next_generation();
        let Some(previous) = state.current.take() else {
            return Ok(generation);
        };

        previous.abort.send_replace(true);
        if *previous.phase.borrow() != RenderPhase::Playing {
            return Ok(generation);
        }

        for _ in 0..self.config.abort_tick_budget {
            tokio::task::yield_now().await;
            if *previous.phase.borrow() != RenderPhase::Playing {
                return Ok(generation);
            }
        }

        error!(
            story_id = ?previous.story_id,
            generation = previous.generation,
            ticks = self.config.abort_tick_budget,
            "Play function did not stop after abort, reloading"
        );
        state.reloading = true;
        self.renderer.view.reload();
        Err(PreviewError::ReloadRequired)
    }

    async fn story_missing(&self, state: &mut State, story_id: Option<String>) -> PreviewError {
        let label = story_id.clone().unwrap_or_default();
        let error = PreviewError::StoryMissing(label);
        if let Err(e) = self.supersede(state).await {
            return e;
        }
        warn!(story_id = ?story_id, "Story missing");
        state.current = Some(errored_handle(self.renderer.current_generation(), None));
        state.rendered = None;
        self.renderer.view.show_error(&ErrorDisplay::from(&error));
        self.renderer
            .channel
            .emit(ChannelEvent::StoryMissing { story_id });
        error
    }

    async fn render_failure(
        &self,
        state: &mut State,
        story_id: &StoryId,
        error: PreviewError,
    ) -> PreviewError {
        if let Err(e) = self.supersede(state).await {
            return e;
        }
        warn!(story_id = %story_id, error = %error, "Failed to prepare story");
        state.current = Some(errored_handle(
            self.renderer.current_generation(),
            Some(story_id.clone()),
        ));
        state.rendered = None;
        self.renderer.view.show_error(&ErrorDisplay::from(&error));
        self.renderer.channel.emit(ChannelEvent::StoryThrewException {
            story_id: story_id.clone(),
            message: error.to_string(),
        });
        error
    }
}

fn errored_handle(generation: u64, story_id: Option<StoryId>) -> RenderHandle {
    let (abort, _) = watch::channel(false);
    let (_, phase) = watch::channel(RenderPhase::Errored);
    RenderHandle {
        generation,
        story_id,
        abort,
        phase,
    }
}
