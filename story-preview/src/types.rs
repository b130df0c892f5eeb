//! Core preview types: selection, view modes and render phases.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use story_index::StoryId;

/// Named inputs for a story, or the shared globals.
pub type Args = Map<String, Value>;

/// How the selected story is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Story,
    Docs,
    Settings,
    #[serde(other)]
    Other,
}

impl ViewMode {
    /// Parse a URL value. Unknown modes become [`ViewMode::Other`].
    pub fn parse(value: &str) -> Self {
        match value {
            "story" => Self::Story,
            "docs" => Self::Docs,
            "settings" => Self::Settings,
            _ => Self::Other,
        }
    }

    /// Whether this mode renders the story at all.
    pub fn renders_story(self) -> bool {
        matches!(self, Self::Story | Self::Docs)
    }

    /// Whether play functions run in this mode.
    pub fn runs_play(self) -> bool {
        self == Self::Story
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Story => "story",
            Self::Docs => "docs",
            Self::Settings => "settings",
            Self::Other => "other",
        })
    }
}

/// The story currently being displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub story_id: StoryId,
    pub view_mode: ViewMode,
}

impl Selection {
    pub fn new(story_id: impl Into<StoryId>, view_mode: ViewMode) -> Self {
        Self {
            story_id: story_id.into(),
            view_mode,
        }
    }
}

/// A request for a story that still has to be resolved against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionSpecifier {
    /// The first story in index order.
    Any,
    /// An exact id, or failing that the first id it is a prefix of.
    Id(String),
    /// A title and story name pair.
    TitleAndName { title: String, name: String },
}

impl SelectionSpecifier {
    /// `*` selects any story, everything else is an id.
    pub fn parse(value: &str) -> Self {
        if value == "*" {
            Self::Any
        } else {
            Self::Id(value.to_string())
        }
    }
}

impl fmt::Display for SelectionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Id(id) => f.write_str(id),
            Self::TitleAndName { title, name } => write!(f, "{title} / {name}"),
        }
    }
}

/// Progress of one render attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderPhase {
    Preparing,
    Loading,
    Rendering,
    Playing,
    Completed,
    Errored,
    Aborted,
}

impl RenderPhase {
    /// Terminal phases never change again for a given generation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Loading => "loading",
            Self::Rendering => "rendering",
            Self::Playing => "playing",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
