//! One render attempt and the boundaries it talks to.
//!
//! A render attempt runs loaders, mounts the story through the
//! [`RenderAdapter`] and runs the play function. It is tagged with a
//! generation; before every externally visible step it checks that its
//! generation is still current and stops as `aborted` otherwise.

use crate::annotations::{AbortSignal, StoryContext};
use crate::channel::{Channel, ChannelEvent};
use crate::error::PreviewError;
use crate::prepare::PreparedStory;
use crate::types::{Args, RenderPhase, ViewMode};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use story_index::BoxError;
use tokio::sync::watch;
use tracing::{debug, warn};

// ===== Boundaries =====

/// What the error surface shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDisplay {
    pub title: String,
    pub description: String,
}

impl ErrorDisplay {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

impl From<&PreviewError> for ErrorDisplay {
    fn from(error: &PreviewError) -> Self {
        Self::new(error.title(), error.to_string())
    }
}

/// The preview's display surfaces.
pub trait PreviewView: Send + Sync {
    /// Show the mounted story.
    fn show_main(&self);
    /// Show the loading state while a new story is prepared.
    fn show_preparing_story(&self);
    /// Show the placeholder for view modes that render nothing.
    fn show_no_preview(&self);
    /// Replace the render surface with an error.
    fn show_error(&self, error: &ErrorDisplay);
    /// Tear everything down and start over. Used when a render will not stop.
    fn reload(&self);
}

/// Mounts a story into the display. Called at most once at a time per
/// mount target; must tolerate being called again for the same target.
#[async_trait]
pub trait RenderAdapter: Send + Sync {
    async fn render_to_dom(&self, context: &RenderContext, mount_target: &str)
        -> Result<(), BoxError>;
}

// ===== Render context =====

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reported {
    Error(ErrorDisplay),
    Exception(String),
}

/// Everything the adapter receives for one render attempt.
pub struct RenderContext {
    pub story: Arc<PreparedStory>,
    pub story_context: StoryContext,
    /// Destroy and recreate the mount rather than updating it in place.
    pub force_remount: bool,
    pub generation: u64,
    view: Arc<dyn PreviewView>,
    reported: Mutex<Option<Reported>>,
}

impl RenderContext {
    /// Render the decorated story with this attempt's context.
    pub fn render_story(&self) -> Result<Value, BoxError> {
        self.story.render(&self.story_context)
    }

    pub fn show_main(&self) {
        self.view.show_main();
    }

    /// Report a handled error. The attempt ends as errored.
    pub fn show_error(&self, title: impl Into<String>, description: impl Into<String>) {
        let display = ErrorDisplay::new(title, description);
        self.view.show_error(&display);
        self.report(Reported::Error(display));
    }

    /// Report an exception thrown while rendering. The attempt ends as errored.
    pub fn show_exception(&self, error: &(dyn std::error::Error + Send + Sync)) {
        let message = error.to_string();
        self.view
            .show_error(&ErrorDisplay::new("Render error", message.clone()));
        self.report(Reported::Exception(message));
    }

    fn report(&self, reported: Reported) {
        let mut slot = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(reported);
    }

    fn take_reported(&self) -> Option<Reported> {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

// ===== Renderer =====

/// Input for one render attempt.
pub(crate) struct RenderJob {
    pub generation: u64,
    pub story: Arc<PreparedStory>,
    pub args: Args,
    pub globals: Args,
    pub view_mode: ViewMode,
    pub force_remount: bool,
    pub abort: AbortSignal,
    pub phase: watch::Sender<RenderPhase>,
}

/// Shared by every render attempt: the generation counter, the outward
/// surfaces and the mount lock.
pub(crate) struct Renderer {
    pub channel: Channel,
    pub adapter: Arc<dyn RenderAdapter>,
    pub view: Arc<dyn PreviewView>,
    pub mount_target: String,
    generation: AtomicU64,
    mount_lock: tokio::sync::Mutex<()>,
}

impl Renderer {
    pub fn new(
        channel: Channel,
        adapter: Arc<dyn RenderAdapter>,
        view: Arc<dyn PreviewView>,
        mount_target: String,
    ) -> Self {
        Self {
            channel,
            adapter,
            view,
            mount_target,
            generation: AtomicU64::new(0),
            mount_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Start a new generation, superseding every earlier one.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    /// Publish `phase` for `job`. Only the current generation is announced.
    fn set_phase(&self, job: &RenderJob, phase: RenderPhase) {
        job.phase.send_replace(phase);
        if self.is_current(job.generation) {
            debug!(story_id = %job.story.id, generation = job.generation, %phase, "Render phase");
            self.channel.emit(ChannelEvent::StoryRenderPhaseChanged {
                story_id: job.story.id.clone(),
                new_phase: phase,
            });
        }
    }

    fn abort(&self, job: &RenderJob) {
        debug!(story_id = %job.story.id, generation = job.generation, "Render superseded");
        job.phase.send_replace(RenderPhase::Aborted);
    }

    fn fail(&self, job: &RenderJob, error: PreviewError) {
        if !self.is_current(job.generation) {
            self.abort(job);
            return;
        }
        warn!(story_id = %job.story.id, error = %error, "Story render failed");
        self.set_phase(job, RenderPhase::Errored);
        self.view.show_error(&ErrorDisplay::from(&error));
        self.channel.emit(ChannelEvent::StoryThrewException {
            story_id: job.story.id.clone(),
            message: error.to_string(),
        });
    }

    /// Run one render attempt to a terminal phase.
    pub async fn run(self: Arc<Self>, job: RenderJob) {
        let story = Arc::clone(&job.story);
        let mut context = story.context(
            job.args.clone(),
            job.globals.clone(),
            job.view_mode,
            job.abort.clone(),
        );

        self.set_phase(&job, RenderPhase::Loading);
        let loaded = story.load(&context).await;
        if !self.is_current(job.generation) {
            return self.abort(&job);
        }
        match loaded {
            Ok(loaded) => context.loaded = loaded,
            Err(e) => return self.fail(&job, PreviewError::Loader(e)),
        }

        let render_context = {
            let _mount = self.mount_lock.lock().await;
            if !self.is_current(job.generation) {
                return self.abort(&job);
            }
            self.set_phase(&job, RenderPhase::Rendering);

            let render_context = RenderContext {
                story: Arc::clone(&story),
                story_context: context.clone(),
                force_remount: job.force_remount,
                generation: job.generation,
                view: Arc::clone(&self.view),
                reported: Mutex::new(None),
            };
            if let Err(e) = self
                .adapter
                .render_to_dom(&render_context, &self.mount_target)
                .await
            {
                return self.fail(&job, PreviewError::Render(e));
            }
            render_context
        };

        match render_context.take_reported() {
            Some(Reported::Exception(message)) => {
                return self.fail(&job, PreviewError::Render(message.into()));
            }
            Some(Reported::Error(display)) => {
                if self.is_current(job.generation) {
                    self.set_phase(&job, RenderPhase::Errored);
                    self.channel.emit(ChannelEvent::StoryErrored {
                        story_id: story.id.clone(),
                        title: display.title,
                        description: display.description,
                    });
                } else {
                    self.abort(&job);
                }
                return;
            }
            None => {}
        }

        if !self.is_current(job.generation) {
            return self.abort(&job);
        }

        if job.force_remount && job.view_mode.runs_play() && story.has_play() {
            self.set_phase(&job, RenderPhase::Playing);
            let played = story.play(&context).await;
            if !self.is_current(job.generation) {
                return self.abort(&job);
            }
            if let Err(e) = played {
                return self.fail(&job, PreviewError::Play(e));
            }
        }

        self.set_phase(&job, RenderPhase::Completed);
        self.channel.emit(ChannelEvent::StoryRendered {
            story_id: story.id.clone(),
        });
    }
}
