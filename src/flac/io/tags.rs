//! Reads embedded title/artist/album tags back out of downloaded audio files.

use std::path::{Path, PathBuf};

use lofty::file::TaggedFileExt;
use lofty::prelude::Accessor;
use lofty::read_from_path;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum TagError {
    #[error("Failed to read tags from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("No tags found in {0}")]
    Missing(PathBuf),
}

pub(crate) type TagResult<T> = Result<T, TagError>;

/// Tag values read from a local file. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ArtifactMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// Anything able to pull [ArtifactMetadata] out of a file on disk.
pub(crate) trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> TagResult<ArtifactMetadata>;
}

/// [TagReader] backed by `lofty`, covering FLAC, MP3, M4A, WAV and AAC.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> TagResult<ArtifactMetadata> {
        let tagged_file = read_from_path(path).map_err(|source| TagError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .ok_or_else(|| TagError::Missing(path.to_path_buf()))?;

        let metadata = ArtifactMetadata {
            title: tag.title().map(|value| value.into_owned()).unwrap_or_default(),
            artist: tag.artist().map(|value| value.into_owned()).unwrap_or_default(),
            album: tag.album().map(|value| value.into_owned()).unwrap_or_default(),
        };
        trace!("Read tags from {}: {:?}", path.display(), metadata);

        Ok(metadata)
    }
}
