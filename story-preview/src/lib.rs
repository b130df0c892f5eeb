//! Story store and preview render engine.
//!
//! This crate provides:
//! - Project, component and story annotations and their composition
//! - A story store holding the index, per-story args and globals
//! - Selection resolution from ids, title/name pairs and preview URLs
//! - A render engine where the most recent selection or mutation always wins
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_preview::testing::{RecordingAdapter, RecordingView, StaticImporter, StaticIndexSource};
//! use story_preview::{Channel, Preview, PreviewConfig, ProjectAnnotations};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let preview = Arc::new(Preview::new(
//!         PreviewConfig::new(),
//!         Channel::default(),
//!         Arc::new(RecordingAdapter::new()),
//!         Arc::new(RecordingView::new()),
//!         Arc::new(StaticImporter::new()),
//!         Arc::new(StaticIndexSource::new(index)),
//!     ));
//!     let _listener = preview.spawn_listener();
//!
//!     preview.initialize("?id=example-button--primary", Ok(ProjectAnnotations::new())).await?;
//!     preview.wait_for_render().await;
//!     Ok(())
//! }
//! ```

pub mod annotations;
pub mod channel;
pub mod error;
pub mod prepare;
pub mod preview;
pub mod render;
pub mod store;
pub mod testing;
pub mod types;
pub mod url;

// Re-export for convenience
pub use annotations::{
    decorator, loader, play, story_fn, AbortSignal, ComponentMeta, CsfModule, Decorator, Loader,
    PlayFunction, ProjectAnnotations, StoryContext, StoryDef, StoryFn,
};
pub use channel::{Channel, ChannelEvent, DEFAULT_CHANNEL_CAPACITY};
pub use error::PreviewError;
pub use prepare::{combine_parameters, decorate_story, prepare_story, PreparedStory};
pub use preview::{
    IndexSource, Preview, PreviewConfig, DEFAULT_ABORT_TICK_BUDGET, DEFAULT_MOUNT_TARGET,
};
pub use render::{ErrorDisplay, PreviewView, RenderAdapter, RenderContext};
pub use store::{ArgsStore, GlobalsStore, ModuleImporter, StoryStore};
pub use types::{Args, RenderPhase, Selection, SelectionSpecifier, ViewMode};
pub use url::{parse_url, UrlState};
