//! Error types for the preview.

use story_index::BoxError;
use thiserror::Error;

/// Errors surfaced by the preview and its story store.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Couldn't find story matching '{0}'")]
    StoryMissing(String),

    #[error("Failed to load project annotations: {0}")]
    Config(String),

    #[error("Failed to import '{import_path}': {source}")]
    Import {
        import_path: String,
        #[source]
        source: BoxError,
    },

    #[error("Module '{import_path}' has no story for '{story_id}'")]
    StoryNotInModule { import_path: String, story_id: String },

    #[error("Loader failed: {0}")]
    Loader(BoxError),

    #[error("Render failed: {0}")]
    Render(BoxError),

    #[error("Play function failed: {0}")]
    Play(BoxError),

    #[error("Failed to load story index: {0}")]
    Index(BoxError),

    #[error("Preview did not yield after abort, a reload was requested")]
    ReloadRequired,

    #[error("Preview is not initialized")]
    NotInitialized,
}

impl PreviewError {
    /// Short title for the error display.
    pub fn title(&self) -> &'static str {
        match self {
            Self::StoryMissing(_) | Self::StoryNotInModule { .. } => "Story missing",
            Self::Config(_) => "Configuration error",
            Self::Import { .. } => "Import error",
            Self::Loader(_) => "Loader error",
            Self::Render(_) => "Render error",
            Self::Play(_) => "Play function error",
            Self::Index(_) => "Index error",
            Self::ReloadRequired => "Reload required",
            Self::NotInitialized => "Not initialized",
        }
    }
}
