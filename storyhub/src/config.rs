//! `storyhub.json` and its command line and environment overrides.
//!
//! ```json
//! {
//!   "stories": [
//!     "./src/**/*.stories.rs",
//!     { "directory": "./packages/ui", "files": "**/*.stories.*", "titlePrefix": "UI" }
//!   ],
//!   "output": "storyhub-index.json",
//!   "storySort": { "order": ["Intro", "Components", "*"] }
//! }
//! ```

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use story_index::model::DEFAULT_FILES_GLOB;
use story_index::{IndexerOptions, StorySort, StorySortConfig, StorySpecifier};

pub const DEFAULT_CONFIG_FILE: &str = "storyhub.json";
pub const DEFAULT_OUTPUT_FILE: &str = "storyhub-index.json";

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "STORYHUB_CONFIG";
/// Overrides the output path.
pub const OUTPUT_ENV: &str = "STORYHUB_OUTPUT";

/// One entry of `stories`: a glob string or an explicit specifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StoriesEntry {
    Glob(String),
    Specifier(SpecifierEntry),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecifierEntry {
    pub directory: String,
    #[serde(default)]
    pub files: Option<String>,
    #[serde(default)]
    pub title_prefix: Option<String>,
}

impl StoriesEntry {
    pub fn to_specifier(&self) -> StorySpecifier {
        match self {
            Self::Glob(entry) => StorySpecifier::from_entry(entry),
            Self::Specifier(entry) => {
                let files = entry.files.as_deref().unwrap_or(DEFAULT_FILES_GLOB);
                let specifier = StorySpecifier::new(&entry.directory, files);
                match &entry.title_prefix {
                    Some(prefix) => specifier.with_title_prefix(prefix.as_str()),
                    None => specifier,
                }
            }
        }
    }
}

/// Contents of `storyhub.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    pub stories: Vec<StoriesEntry>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub story_sort: Option<StorySortConfig>,
    #[serde(default)]
    pub docs_only_export: Option<String>,
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_FILE)
}

impl HubConfig {
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.stories.is_empty() {
            bail!("`stories` must list at least one entry");
        }
        Ok(config)
    }

    pub fn specifiers(&self) -> Vec<StorySpecifier> {
        self.stories.iter().map(StoriesEntry::to_specifier).collect()
    }
}

// ===== Settings =====

/// Everything a command needs, with overrides applied and paths absolute.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory containing the config file; specifiers are relative to it.
    pub working_dir: PathBuf,
    pub output: PathBuf,
    pub config: HubConfig,
}

impl Settings {
    /// Load settings from the process environment.
    pub async fn load(config_flag: Option<&Path>, output_flag: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(config_flag, output_flag, |name| std::env::var(name).ok()).await
    }

    /// Load settings. Precedence is flag, then environment, then file.
    pub async fn load_with_env(
        config_flag: Option<&Path>,
        output_flag: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let config_path = config_flag
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config_path = tokio::fs::canonicalize(&config_path)
            .await
            .with_context(|| format!("config file not found: {}", config_path.display()))?;
        let json = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config = HubConfig::parse(&json)
            .with_context(|| format!("invalid config {}", config_path.display()))?;

        let working_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let output = output_flag
            .map(Path::to_path_buf)
            .or_else(|| env(OUTPUT_ENV).map(PathBuf::from))
            .unwrap_or_else(|| config.output.clone());
        let output = if output.is_absolute() {
            output
        } else {
            working_dir.join(output)
        };

        Ok(Self {
            working_dir,
            output,
            config,
        })
    }

    pub fn indexer_options(&self) -> IndexerOptions {
        let mut options = IndexerOptions::new(&self.working_dir);
        if let Some(sort) = &self.config.story_sort {
            options = options.with_story_sort(StorySort::Config(sort.clone()));
        }
        if let Some(export) = &self.config.docs_only_export {
            options = options.with_docs_only_export(export.as_str());
        }
        options
    }
}
