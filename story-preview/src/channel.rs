//! Events exchanged between the manager and the preview, and the in-process
//! bus that carries them.

use crate::types::{Args, RenderPhase, ViewMode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use story_index::StoryId;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Every event the preview consumes or produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ChannelEvent {
    // Incoming
    SetCurrentStory {
        story_id: StoryId,
        #[serde(default)]
        view_mode: ViewMode,
    },
    UpdateStoryArgs {
        story_id: StoryId,
        patch: Args,
    },
    ResetStoryArgs {
        story_id: StoryId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arg_names: Option<Vec<String>>,
    },
    UpdateGlobals {
        patch: Args,
    },
    ForceReRender {},
    ForceRemount {
        story_id: StoryId,
    },
    StoryIndexInvalidated {},

    // Outgoing
    StorySpecified {
        story_id: StoryId,
        view_mode: ViewMode,
    },
    StoryPrepared {
        id: StoryId,
        parameters: Map<String, Value>,
        initial_args: Args,
        args: Args,
    },
    StoryRenderPhaseChanged {
        story_id: StoryId,
        new_phase: RenderPhase,
    },
    StoryRendered {
        story_id: StoryId,
    },
    StoryThrewException {
        story_id: StoryId,
        message: String,
    },
    StoryErrored {
        story_id: StoryId,
        title: String,
        description: String,
    },
    StoryMissing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        story_id: Option<String>,
    },
    StoryUnchanged {
        story_id: StoryId,
    },
    StoryArgsUpdated {
        story_id: StoryId,
        args: Args,
    },
    SetGlobals {
        globals: Args,
    },
    GlobalsUpdated {
        globals: Args,
        initial_globals: Args,
    },
    ConfigError {
        message: String,
    },
}

impl ChannelEvent {
    /// Whether the preview handles this event (as opposed to emitting it).
    pub fn is_incoming(&self) -> bool {
        matches!(
            self,
            Self::SetCurrentStory { .. }
                | Self::UpdateStoryArgs { .. }
                | Self::ResetStoryArgs { .. }
                | Self::UpdateGlobals { .. }
                | Self::ForceReRender {}
                | Self::ForceRemount { .. }
                | Self::StoryIndexInvalidated {}
        )
    }

    /// The wire name, e.g. `STORY_RENDERED`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetCurrentStory { .. } => "SET_CURRENT_STORY",
            Self::UpdateStoryArgs { .. } => "UPDATE_STORY_ARGS",
            Self::ResetStoryArgs { .. } => "RESET_STORY_ARGS",
            Self::UpdateGlobals { .. } => "UPDATE_GLOBALS",
            Self::ForceReRender {} => "FORCE_RE_RENDER",
            Self::ForceRemount { .. } => "FORCE_REMOUNT",
            Self::StoryIndexInvalidated {} => "STORY_INDEX_INVALIDATED",
            Self::StorySpecified { .. } => "STORY_SPECIFIED",
            Self::StoryPrepared { .. } => "STORY_PREPARED",
            Self::StoryRenderPhaseChanged { .. } => "STORY_RENDER_PHASE_CHANGED",
            Self::StoryRendered { .. } => "STORY_RENDERED",
            Self::StoryThrewException { .. } => "STORY_THREW_EXCEPTION",
            Self::StoryErrored { .. } => "STORY_ERRORED",
            Self::StoryMissing { .. } => "STORY_MISSING",
            Self::StoryUnchanged { .. } => "STORY_UNCHANGED",
            Self::StoryArgsUpdated { .. } => "STORY_ARGS_UPDATED",
            Self::SetGlobals { .. } => "SET_GLOBALS",
            Self::GlobalsUpdated { .. } => "GLOBALS_UPDATED",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
    }
}

/// In-process event bus. Cloning shares the bus.
#[derive(Debug, Clone)]
pub struct Channel {
    sender: broadcast::Sender<ChannelEvent>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: ChannelEvent) {
        trace!(event = event.name(), "Emitting channel event");
        let _ = self.sender.send(event);
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let event = ChannelEvent::StoryRendered {
            story_id: StoryId::from("a--1"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "STORY_RENDERED", "storyId": "a--1" })
        );
        assert_eq!(event.name(), "STORY_RENDERED");
    }

    #[test]
    fn test_parse_incoming() {
        let event: ChannelEvent = serde_json::from_value(json!({
            "type": "RESET_STORY_ARGS",
            "storyId": "a--1",
            "argNames": ["bar"]
        }))
        .unwrap();
        assert_eq!(
            event,
            ChannelEvent::ResetStoryArgs {
                story_id: StoryId::from("a--1"),
                arg_names: Some(vec!["bar".to_string()]),
            }
        );
        assert!(event.is_incoming());

        let event: ChannelEvent = serde_json::from_value(json!({ "type": "FORCE_RE_RENDER" })).unwrap();
        assert_eq!(event, ChannelEvent::ForceReRender {});
    }

    #[tokio::test]
    async fn test_emit_and_subscribe() {
        let channel = Channel::default();
        channel.emit(ChannelEvent::StoryIndexInvalidated {});
        let mut rx = channel.subscribe();
        channel.emit(ChannelEvent::ForceReRender {});
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::ForceReRender {});
    }
}
