//! Reading and writing the serialized story index.

use crate::error::IndexFormatError;
use crate::model::StoryIndex;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Write `index` as pretty JSON, creating parent directories as needed.
pub async fn write_index(index: &StoryIndex, path: impl AsRef<Path>) -> Result<(), IndexFormatError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let content = index.to_json()?;
    fs::write(path, content).await?;
    debug!(path = %path.display(), entries = index.len(), "Wrote story index");
    Ok(())
}

/// Load an index written by [`write_index`] (or any producer of the format).
pub async fn read_index(path: impl AsRef<Path>) -> Result<StoryIndex, IndexFormatError> {
    let content = fs::read_to_string(path.as_ref()).await?;
    Ok(StoryIndex::from_json(&content)?)
}
