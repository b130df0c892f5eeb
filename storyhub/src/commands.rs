//! Command implementations.

use crate::cli::{IndexArgs, ResolveArgs};
use crate::config::Settings;
use anyhow::{bail, Context};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use story_index::{read_index, write_index, StoryIndex, StoryIndexGenerator};
use story_preview::{parse_url, ProjectAnnotations, SelectionSpecifier, StoryStore};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Quiet period after a change before rebuilding.
const DEBOUNCE: Duration = Duration::from_millis(150);

pub fn generator(settings: &Settings) -> StoryIndexGenerator {
    StoryIndexGenerator::new(settings.config.specifiers(), settings.indexer_options())
}

async fn emit(index: &StoryIndex, settings: &Settings, args: &IndexArgs) -> anyhow::Result<()> {
    if args.stdout {
        println!("{}", index.to_json()?);
    } else {
        write_index(index, &settings.output)
            .await
            .with_context(|| format!("failed to write {}", settings.output.display()))?;
        info!(path = %settings.output.display(), entries = index.len(), "Wrote story index");
    }
    Ok(())
}

// ===== index =====

pub async fn run_index(settings: &Settings, args: &IndexArgs) -> anyhow::Result<()> {
    let mut generator = generator(settings);
    let index = generator.initialize().await?;
    emit(&index, settings, args).await
}

// ===== watch =====

pub async fn run_watch(settings: &Settings, args: &IndexArgs) -> anyhow::Result<()> {
    let mut generator = generator(settings);
    match generator.initialize().await {
        Ok(index) => emit(&index, settings, args).await?,
        Err(e) => error!(error = %e, "Initial index build failed, waiting for changes"),
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    for root in watch_roots(settings) {
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        info!(path = %root.display(), "Watching for story changes");
    }

    loop {
        let first = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut events = vec![first];
        tokio::time::sleep(DEBOUNCE).await;
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        let mut affected = false;
        for event in events {
            match event {
                Ok(event) => affected |= apply_event(&mut generator, &event),
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        }
        if !affected {
            continue;
        }

        match generator.get_index().await {
            Ok(index) => emit(&index, settings, args).await?,
            Err(e) => error!(error = %e, "Rebuilding the story index failed, keeping the last one"),
        }
    }

    info!("Stopped watching");
    Ok(())
}

/// The directories that hold every specifier's files.
fn watch_roots(settings: &Settings) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for specifier in settings.config.specifiers() {
        let dir = specifier.directory().trim_start_matches("./");
        let root = if dir == "." {
            settings.working_dir.clone()
        } else {
            settings.working_dir.join(dir)
        };
        if !roots.iter().any(|r| root.starts_with(r)) {
            roots.retain(|r| !r.starts_with(&root));
            roots.push(root);
        }
    }
    roots
}

/// Forward one notification to the generator. Returns whether any specifier
/// was affected.
fn apply_event(generator: &mut StoryIndexGenerator, event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    let mut affected = false;
    for path in &event.paths {
        let removed = matches!(event.kind, EventKind::Remove(_)) || !path.exists();
        if generator.invalidate_path(path, removed) {
            debug!(path = %path.display(), removed, "Story file changed");
            affected = true;
        }
    }
    affected
}

// ===== resolve =====

pub async fn run_resolve(settings: &Settings, args: &ResolveArgs) -> anyhow::Result<()> {
    let path = args.index.as_deref().unwrap_or(&settings.output);
    let index = read_index(path)
        .await
        .with_context(|| format!("failed to read index {}", path.display()))?;

    let specifier = specifier(args);
    let store = StoryStore::new(Arc::new(ProjectAnnotations::new()), Arc::new(index));
    let Some(id) = store.resolve(&specifier) else {
        bail!("no story matches '{specifier}'");
    };
    let entry = store.entry(id.as_str())?;
    println!("{}\t{} / {}\t{}", entry.id, entry.title, entry.name, entry.import_path);
    Ok(())
}

fn specifier(args: &ResolveArgs) -> SelectionSpecifier {
    if let (Some(title), Some(name)) = (&args.title, &args.name) {
        return SelectionSpecifier::TitleAndName {
            title: title.clone(),
            name: name.clone(),
        };
    }
    if let Some(url) = &args.url {
        return parse_url(url).specifier_or_any();
    }
    args.id
        .as_deref()
        .map_or(SelectionSpecifier::Any, SelectionSpecifier::parse)
}
