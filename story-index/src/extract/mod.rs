//! Story extraction: turning one source file into annotation records.
//!
//! The [`Extractor`] trait is the pluggable seam. [`CsfExtractor`] is the
//! default implementation, reading "component story format" modules:
//!
//! ```text
//! export default { title: 'Example/Button', tags: ['autodocs'] };
//! export const Primary = { args: { primary: true } };
//! export const Secondary = { name: 'Secondary Button' };
//! ```

mod csf;

use crate::error::ExtractError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

pub use csf::parse_csf;

/// File-level annotation from a module's default export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentAnnotation {
    /// Explicit title; when absent the title is derived from the file path.
    pub title: Option<String>,
    /// Explicit component id, replacing the title in story ids.
    pub id: Option<String>,
    pub tags: Vec<String>,
}

/// One story export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryAnnotation {
    /// Exported identifier; the id's story part is derived from it.
    pub export_name: String,
    /// Display name override.
    pub name: Option<String>,
    /// Explicit full story id (`parameters.__id`).
    pub id: Option<String>,
    pub tags: Vec<String>,
    /// Statically readable parameters.
    pub parameters: Map<String, Value>,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub component: Option<ComponentAnnotation>,
    pub stories: Vec<StoryAnnotation>,
}

/// Parses one source file into annotations.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

/// Reads component-story-format modules from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsfExtractor;

#[async_trait]
impl Extractor for CsfExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let source = tokio::fs::read_to_string(path).await?;
        let extracted = parse_csf(&source)?;
        debug!(
            path = %path.display(),
            stories = extracted.stories.len(),
            "Extracted story file"
        );
        Ok(extracted)
    }
}
