//! Glob resolution: expanding story specifiers into concrete file lists.

use crate::error::IndexGenerationError;
use crate::model::StorySpecifier;
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Expands a specifier into the files it covers.
///
/// Implementations do no caching; the generator sorts the result into its
/// canonical order, so listing order does not matter.
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(
        &self,
        working_dir: &Path,
        specifier: &StorySpecifier,
    ) -> Result<Vec<PathBuf>, IndexGenerationError>;
}

/// Filesystem globbing resolver. Skips anything under `node_modules`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobResolver;

#[async_trait]
impl FileResolver for GlobResolver {
    async fn resolve(
        &self,
        working_dir: &Path,
        specifier: &StorySpecifier,
    ) -> Result<Vec<PathBuf>, IndexGenerationError> {
        let pattern = absolute_pattern(working_dir, specifier);
        let blocking_pattern = pattern.clone();

        let files = tokio::task::spawn_blocking(move || expand(&blocking_pattern))
            .await
            .map_err(|e| IndexGenerationError::Glob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })??;

        debug!(pattern = %pattern, count = files.len(), "Resolved story specifier");
        Ok(files)
    }
}

fn expand(pattern: &str) -> Result<Vec<PathBuf>, IndexGenerationError> {
    let paths = glob::glob_with(pattern, MATCH_OPTIONS).map_err(|e| IndexGenerationError::Glob {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for path in paths {
        match path {
            Ok(path) if path.is_file() && !in_node_modules(&path) => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unreadable path while globbing"),
        }
    }
    files.sort();
    Ok(files)
}

fn in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == "node_modules"))
}

/// The specifier's glob anchored at `working_dir`.
pub fn absolute_pattern(working_dir: &Path, specifier: &StorySpecifier) -> String {
    let dir = specifier.directory().trim_start_matches("./");
    let base = if dir == "." {
        working_dir.to_path_buf()
    } else {
        working_dir.join(dir)
    };
    format!(
        "{}/{}",
        base.to_string_lossy().trim_end_matches('/'),
        specifier.files()
    )
}

/// Whether `path` (absolute) is covered by `specifier`.
pub fn specifier_matches(working_dir: &Path, specifier: &StorySpecifier, path: &Path) -> bool {
    let pattern = absolute_pattern(working_dir, specifier);
    match Pattern::new(&pattern) {
        Ok(p) => p.matches_path_with(path, MATCH_OPTIONS) && !in_node_modules(path),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid specifier glob");
            false
        }
    }
}

/// The import path of `path` relative to `working_dir`, e.g. `./src/Button.stories.rs`.
pub fn import_path(working_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(working_dir).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if relative.is_absolute() {
        joined
    } else {
        format!("./{joined}")
    }
}
