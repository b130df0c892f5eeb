//! Error types for index generation.

use crate::model::StoryId;
use crate::sort::SortError;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by user-supplied functions (comparators, extractors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort an index build.
#[derive(Debug, Error)]
pub enum IndexGenerationError {
    #[error("No stories found: a project must export at least one story")]
    EmptyIndex,

    #[error("Duplicate story id '{id}' in {first} and {second}")]
    DuplicateId {
        id: StoryId,
        first: String,
        second: String,
    },

    #[error("Failed to extract stories from {}: {source}", path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("Invalid story id in {import_path}: {source}")]
    Id {
        import_path: String,
        #[source]
        source: IdError,
    },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    #[error(transparent)]
    Sort(#[from] SortError),
}

/// Errors raised by an [`Extractor`](crate::extract::Extractor) for a single file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(BoxError),
}

/// A title or story name that cannot be turned into an id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("Invalid {part} '{value}': it sanitizes to an empty id")]
    EmptyPart { part: &'static str, value: String },
}

/// Errors reading or writing the serialized index.
#[derive(Debug, Error)]
pub enum IndexFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_file_io_failure_surfaces_as_extract_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = IndexGenerationError::Extract {
            path: PathBuf::from("/project/src/a.stories.ts"),
            source: ExtractError::from(io),
        };
        assert_eq!(
            err.to_string(),
            "Failed to extract stories from /project/src/a.stories.ts: IO error: gone"
        );
        assert!(matches!(
            err.source().and_then(|s| s.downcast_ref::<ExtractError>()),
            Some(ExtractError::Io(_))
        ));
    }
}
