//! Story discovery and index generation.
//!
//! This crate provides:
//! - Story specifiers and glob-based file resolution
//! - A pluggable extractor for story source files
//! - A caching index generator with targeted invalidation
//! - Story sorting and the versioned JSON index format
//!
//! # Quick Start
//!
//! ```ignore
//! use story_index::{IndexerOptions, StoryIndexGenerator, StorySpecifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let specifiers = vec![StorySpecifier::from_entry("./src/**/*.stories.*")];
//!     let mut generator = StoryIndexGenerator::new(specifiers, IndexerOptions::new("."));
//!
//!     let index = generator.initialize().await?;
//!     story_index::write_index(&index, "index.json").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod extract;
pub mod generator;
pub mod id;
pub mod model;
pub mod persist;
pub mod resolve;
pub mod sort;
pub mod title;

// Re-export for convenience
pub use error::{BoxError, ExtractError, IdError, IndexFormatError, IndexGenerationError};
pub use extract::{ComponentAnnotation, CsfExtractor, Extracted, Extractor, StoryAnnotation};
pub use generator::{FileToken, IndexerOptions, StoryIndexGenerator, DOCS_ONLY_EXPORT};
pub use id::{sanitize, story_name_from_export, to_id};
pub use model::{EntryParameters, IndexEntry, StoryId, StoryIndex, StorySpecifier, INDEX_VERSION};
pub use persist::{read_index, write_index};
pub use resolve::{FileResolver, GlobResolver};
pub use sort::{OrderItem, SortError, SortMethod, StoryComparator, StorySort, StorySortConfig};
