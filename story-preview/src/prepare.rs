//! Story preparation: combining project, component and story annotations
//! into one immutable, renderable story.

use crate::annotations::{
    AbortSignal, CsfModule, Decorator, Loader, PlayFunction, ProjectAnnotations, StoryContext,
    StoryDef, StoryFn,
};
use crate::error::PreviewError;
use crate::types::{Args, ViewMode};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use story_index::{to_id, BoxError, IndexEntry, StoryId};

/// A story with every annotation layer applied.
pub struct PreparedStory {
    pub id: StoryId,
    pub name: String,
    pub title: String,
    pub import_path: String,
    pub tags: Vec<String>,
    pub parameters: Arc<Map<String, Value>>,
    pub initial_args: Args,
    /// Signature of the module this story was prepared from.
    pub module_signature: String,
    /// Render function with all decorators applied.
    story_fn: StoryFn,
    loaders: Vec<Loader>,
    play: Option<PlayFunction>,
}

impl fmt::Debug for PreparedStory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStory")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("name", &self.name)
            .field("import_path", &self.import_path)
            .field("loaders", &self.loaders.len())
            .field("has_play", &self.play.is_some())
            .finish()
    }
}

impl PreparedStory {
    pub fn has_play(&self) -> bool {
        self.play.is_some()
    }

    /// Build the context for one render attempt. `loaded` starts empty.
    pub fn context(
        &self,
        args: Args,
        globals: Args,
        view_mode: ViewMode,
        abort: AbortSignal,
    ) -> StoryContext {
        StoryContext {
            id: self.id.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            tags: self.tags.clone(),
            view_mode,
            args,
            initial_args: self.initial_args.clone(),
            globals,
            parameters: Arc::clone(&self.parameters),
            loaded: Map::new(),
            abort,
        }
    }

    /// Run every loader concurrently and merge their results in declaration
    /// order (project, component, story). The first failure wins.
    pub async fn load(&self, context: &StoryContext) -> Result<Map<String, Value>, BoxError> {
        let results = try_join_all(self.loaders.iter().map(|loader| loader(context.clone()))).await?;
        let mut loaded = Map::new();
        for result in results {
            loaded.extend(result);
        }
        Ok(loaded)
    }

    /// Call the decorated story function.
    pub fn render(&self, context: &StoryContext) -> Result<Value, BoxError> {
        (self.story_fn)(context)
    }

    /// Run the play function, if any.
    pub async fn play(&self, context: &StoryContext) -> Result<(), BoxError> {
        match &self.play {
            Some(play) => play(context.clone()).await,
            None => Ok(()),
        }
    }
}

/// Find the story in `module` that produced `entry` and combine it with the
/// component and project layers.
pub fn prepare_story(
    entry: &IndexEntry,
    module: &CsfModule,
    project: &ProjectAnnotations,
) -> Result<PreparedStory, PreviewError> {
    let meta = &module.meta;
    let kind = meta.id.as_deref().unwrap_or(&entry.title);
    let story = module
        .stories
        .iter()
        .find(|story| story_id(kind, story).as_ref() == Some(&entry.id))
        .ok_or_else(|| PreviewError::StoryNotInModule {
            import_path: entry.import_path.clone(),
            story_id: entry.id.to_string(),
        })?;

    let mut parameters = project.parameters.clone();
    combine_parameters(&mut parameters, &meta.parameters);
    combine_parameters(&mut parameters, &story.parameters);

    let mut initial_args = meta.args.clone();
    initial_args.extend(story.args.clone());

    let render = story
        .render
        .clone()
        .or_else(|| meta.render.clone())
        .or_else(|| project.render.clone())
        .unwrap_or_else(missing_render);

    let decorators: Vec<Decorator> = story
        .decorators
        .iter()
        .chain(&meta.decorators)
        .chain(&project.decorators)
        .cloned()
        .collect();

    let loaders: Vec<Loader> = project
        .loaders
        .iter()
        .chain(&meta.loaders)
        .chain(&story.loaders)
        .cloned()
        .collect();

    let mut tags = meta.tags.clone();
    for tag in &story.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    Ok(PreparedStory {
        id: entry.id.clone(),
        name: story.name.clone().unwrap_or_else(|| entry.name.clone()),
        title: entry.title.clone(),
        import_path: entry.import_path.clone(),
        tags,
        parameters: Arc::new(parameters),
        initial_args,
        module_signature: module.signature.clone(),
        story_fn: decorate_story(render, &decorators),
        loaders,
        play: story.play.clone(),
    })
}

fn story_id(kind: &str, story: &StoryDef) -> Option<StoryId> {
    match &story.id {
        Some(id) => Some(StoryId::new(id.as_str())),
        None => to_id(kind, &story.export_name).ok(),
    }
}

fn missing_render() -> StoryFn {
    Arc::new(|context: &StoryContext| -> Result<Value, BoxError> {
        Err(format!("No render function available for story '{}'", context.id).into())
    })
}

/// Apply decorators around `story`; the first decorator is innermost.
pub fn decorate_story(story: StoryFn, decorators: &[Decorator]) -> StoryFn {
    decorators.iter().fold(story, |inner, decorator| {
        let decorator = Arc::clone(decorator);
        let composed: StoryFn =
            Arc::new(move |context: &StoryContext| decorator(Arc::clone(&inner), context));
        composed
    })
}

/// Merge `layer` into `base`, recursing into objects present on both sides.
pub fn combine_parameters(base: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                combine_parameters(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{decorator, loader, story_fn, ComponentMeta};
    use serde_json::json;
    use story_index::EntryParameters;

    fn entry(id: &str, title: &str) -> IndexEntry {
        IndexEntry {
            id: StoryId::from(id),
            name: "Primary".to_string(),
            title: title.to_string(),
            import_path: "./button.stories.rs".to_string(),
            tags: vec![],
            parameters: EntryParameters::default(),
        }
    }

    fn wrap(label: &'static str) -> Decorator {
        decorator(move |inner, ctx| Ok(json!({ (label): inner(ctx)? })))
    }

    fn module() -> CsfModule {
        CsfModule::new(
            "v1",
            ComponentMeta::new()
                .with_title("Button")
                .with_arg("label", json!("Button"))
                .with_arg("size", json!("medium"))
                .with_parameter("layout", json!({ "padded": true, "fullscreen": false }))
                .with_decorator(wrap("component"))
                .with_render(story_fn(|ctx| Ok(json!(ctx.args)))),
        )
        .with_story(
            StoryDef::new("Primary")
                .with_arg("size", json!("large"))
                .with_parameter("layout", json!({ "fullscreen": true }))
                .with_decorator(wrap("story")),
        )
    }

    fn context(story: &PreparedStory) -> StoryContext {
        story.context(
            story.initial_args.clone(),
            Args::new(),
            ViewMode::Story,
            AbortSignal::never(),
        )
    }

    #[test]
    fn test_merges_args_and_parameters() {
        let project = ProjectAnnotations::new().with_parameter("layout", json!({ "centered": true }));
        let story = prepare_story(&entry("button--primary", "Button"), &module(), &project).unwrap();

        assert_eq!(json!(story.initial_args), json!({ "label": "Button", "size": "large" }));
        assert_eq!(
            story.parameters["layout"],
            json!({ "centered": true, "padded": true, "fullscreen": true })
        );
    }

    #[test]
    fn test_decorators_wrap_story_then_component_then_project() {
        let project = ProjectAnnotations::new().with_decorator(wrap("project"));
        let story = prepare_story(&entry("button--primary", "Button"), &module(), &project).unwrap();

        let rendered = story.render(&context(&story)).unwrap();
        assert_eq!(
            rendered,
            json!({ "project": { "component": { "story": { "label": "Button", "size": "large" } } } })
        );
    }

    #[test]
    fn test_story_not_in_module() {
        let result = prepare_story(
            &entry("button--secondary", "Button"),
            &module(),
            &ProjectAnnotations::new(),
        );
        assert!(matches!(result, Err(PreviewError::StoryNotInModule { .. })));
    }

    #[test]
    fn test_missing_render_errors_at_render_time() {
        let module = CsfModule::new("v1", ComponentMeta::new()).with_story(StoryDef::new("Primary"));
        let story =
            prepare_story(&entry("button--primary", "Button"), &module, &ProjectAnnotations::new())
                .unwrap();
        assert!(story.render(&context(&story)).is_err());
    }

    #[tokio::test]
    async fn test_loaders_merge_in_order() {
        let project = ProjectAnnotations::new().with_loader(loader(|_| async {
            let mut loaded = Map::new();
            loaded.insert("a".into(), json!("project"));
            loaded.insert("b".into(), json!("project"));
            Ok::<_, BoxError>(loaded)
        }));
        let mut module = module();
        module.stories[0] = module.stories[0]
            .clone()
            .with_loader(loader(|ctx| async move {
                let mut loaded = Map::new();
                loaded.insert("b".into(), json!("story"));
                loaded.insert("size".into(), ctx.args["size"].clone());
                Ok::<_, BoxError>(loaded)
            }));

        let story = prepare_story(&entry("button--primary", "Button"), &module, &project).unwrap();
        let loaded = story.load(&context(&story)).await.unwrap();
        assert_eq!(json!(loaded), json!({ "a": "project", "b": "story", "size": "large" }));
    }

    #[tokio::test]
    async fn test_loader_error_propagates() {
        let project = ProjectAnnotations::new().with_loader(loader(|_| async { Err::<Map<String, Value>, BoxError>("nope".into()) }));
        let story = prepare_story(&entry("button--primary", "Button"), &module(), &project).unwrap();
        let err = story.load(&context(&story)).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
