use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use crate::flac::blacklist::{Blacklist, contains_any_ignore_case};
use crate::flac::io::directory::sanitize_file_name;
use crate::flac::io::tags::{ArtifactMetadata, TagError, TagReader};
use crate::flac::io::{Config, FilesConfig};
use crate::flac::pool::PathClaims;
use crate::flac::resolver::{ResolveError, Resolver};
use crate::flac::sender::entries::CatalogEntry;
use crate::flac::sender::{ApiError, Fetcher, ResolveEndpoint};

/// More mismatches than this and the download is discarded even without a forcing mismatch.
const MAX_MISMATCHES: usize = 3;

#[derive(Error, Debug)]
pub(crate) enum ProcessError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Failed to download {path}: {source}")]
    Download {
        path: PathBuf,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Tags(#[from] TagError),

    #[error("Failed to download cover {url}: {source}")]
    Cover {
        url: String,
        #[source]
        source: ApiError,
    },
}

pub(crate) type ProcessResult<T> = Result<T, ProcessError>;

/// One catalog entry to download, together with the context of the search that produced it.
#[derive(Debug, Clone)]
pub(crate) struct ProcessingTask {
    pub entry: CatalogEntry,
    pub base_dir: PathBuf,
    pub unlock_code: String,
    /// The search keyword this entry was found under.
    pub keyword: String,
}

/// A disagreement between the catalog record and the tags embedded in the downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mismatch {
    pub field: &'static str,
    /// The embedded value (or matched keyword) that caused the mismatch.
    pub found: String,
    /// A forcing mismatch discards the file on its own.
    pub forcing: bool,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.forcing { "forcing" } else { "soft" };
        write!(f, "{} ({}): \"{}\"", self.field, kind, self.found)
    }
}

/// What happened to a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    /// The file was already on disk; nothing was requested.
    Skipped { path: PathBuf },
    /// Another worker on the same page is handling the same destination.
    Duplicate { path: PathBuf },
    Kept { path: PathBuf, tier: String },
    /// Downloaded, then deleted after validation.
    Rejected { path: PathBuf, mismatches: Vec<Mismatch> },
}

/// Where a catalog entry lands on disk, minus the extension which depends on the resolved tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Destination {
    pub dir: PathBuf,
    pub stem: String,
}

impl Destination {
    /// `<base>/<performers>/<album>/<title>`, every component sanitized.
    pub(crate) fn for_entry(base_dir: &Path, entry: &CatalogEntry) -> Self {
        Destination {
            dir: base_dir
                .join(sanitize_file_name(&entry.joined_singers()))
                .join(sanitize_file_name(&entry.album_name)),
            stem: sanitize_file_name(&entry.name),
        }
    }

    pub(crate) fn file_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, extension))
    }

    /// Key used to claim this destination regardless of extension.
    fn claim_key(&self) -> PathBuf {
        self.dir.join(&self.stem)
    }

    fn existing(&self, files: &FilesConfig) -> Option<PathBuf> {
        [&files.lossless_extension, &files.lossy_extension]
            .into_iter()
            .map(|extension| self.file_path(extension))
            .find(|path| path.exists())
    }
}

/// Downloads, validates and files a single catalog entry.
pub(crate) struct ItemProcessor {
    resolver: Resolver,
    fetcher: Arc<dyn Fetcher>,
    tag_reader: Arc<dyn TagReader>,
    blacklist: Blacklist,
    files: FilesConfig,
    item_delay: Duration,
}

impl ItemProcessor {
    pub(crate) fn new(
        resolver: Resolver,
        fetcher: Arc<dyn Fetcher>,
        tag_reader: Arc<dyn TagReader>,
        blacklist: Blacklist,
        files: FilesConfig,
        item_delay: Duration,
    ) -> Self {
        ItemProcessor {
            resolver,
            fetcher,
            tag_reader,
            blacklist,
            files,
            item_delay,
        }
    }

    pub(crate) fn from_config(
        config: &Config,
        endpoint: Arc<dyn ResolveEndpoint>,
        fetcher: Arc<dyn Fetcher>,
        tag_reader: Arc<dyn TagReader>,
    ) -> Self {
        Self::new(
            Resolver::from_config(endpoint, config),
            fetcher,
            tag_reader,
            Blacklist::new(&config.clean.exclude_keywords),
            config.files.clone(),
            config.item_delay(),
        )
    }

    /// Processes one task.
    ///
    /// Files already on disk under any extension are skipped without a single request. Whenever the
    /// task fails or the file is rejected, the destination directory is pruned upward while empty,
    /// stopping at the base directory.
    ///
    /// # Arguments
    ///
    /// * `task`: The entry to fetch.
    /// * `claims`: Destinations currently being processed on this page.
    pub(crate) fn process(&self, task: &ProcessingTask, claims: &PathClaims) -> ProcessResult<ItemOutcome> {
        let destination = Destination::for_entry(&task.base_dir, &task.entry);

        let claim = match claims.claim(&destination.claim_key(), &destination.dir, &task.base_dir) {
            Some(claim) => claim,
            None => {
                debug!("\"{}\" is already being processed on this page", task.entry.name);
                return Ok(ItemOutcome::Duplicate {
                    path: destination.claim_key(),
                });
            }
        };

        if let Some(path) = destination.existing(&self.files) {
            trace!("{} already exists, skipping", path.display());
            return Ok(ItemOutcome::Skipped { path });
        }

        claim.create_dir().map_err(|source| ProcessError::CreateDir {
            path: destination.dir.clone(),
            source,
        })?;

        let result = self.fetch_and_validate(task, &destination);
        if matches!(result, Ok(ItemOutcome::Kept { .. })) {
            drop(claim);
        } else {
            match claim.release_and_prune(&self.files.cover_file_name) {
                Ok(removed) if !removed.is_empty() => trace!("Pruned {} empty directories", removed.len()),
                Ok(_) => {}
                Err(err) => warn!("Failed to prune {}: {}", destination.dir.display(), err),
            }
        }

        if result.is_ok() {
            sleep(self.item_delay);
        }
        result
    }

    fn fetch_and_validate(&self, task: &ProcessingTask, destination: &Destination) -> ProcessResult<ItemOutcome> {
        let entry = &task.entry;
        let resolution = self.resolver.resolve(entry, &task.unlock_code)?;

        let extension = if resolution.is_primary() {
            &self.files.lossless_extension
        } else {
            &self.files.lossy_extension
        };
        let path = destination.file_path(extension);

        self.fetcher
            .download(&resolution.url, &path)
            .map_err(|source| ProcessError::Download {
                path: path.clone(),
                source,
            })?;

        let metadata = match self.tag_reader.read_tags(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                remove_download(&path);
                return Err(err.into());
            }
        };

        let mismatches = self.mismatches(task, &path, &metadata);
        if should_discard(&mismatches) {
            info!("Discarding {}", path.display());
            for mismatch in &mismatches {
                info!("  mismatch {}", mismatch);
            }
            remove_download(&path);
            return Ok(ItemOutcome::Rejected { path, mismatches });
        }

        if !entry.pic_url.is_empty() {
            let cover = destination.dir.join(&self.files.cover_file_name);
            self.fetcher
                .download(&entry.pic_url, &cover)
                .map_err(|source| ProcessError::Cover {
                    url: entry.pic_url.clone(),
                    source,
                })?;
        }

        info!("Saved {} ({})", path.display(), resolution.tier);
        Ok(ItemOutcome::Kept {
            path,
            tier: resolution.tier,
        })
    }

    /// Compares the embedded tags against the catalog record.
    ///
    /// Album and title must match exactly, the artist tag must mention one of the performers.
    /// The artist tag not containing the search keyword, or the path hitting the blacklist, are
    /// forcing mismatches.
    pub(crate) fn mismatches(&self, task: &ProcessingTask, path: &Path, metadata: &ArtifactMetadata) -> Vec<Mismatch> {
        let entry = &task.entry;
        let mut mismatches = Vec::new();

        if metadata.album != entry.album_name {
            mismatches.push(Mismatch {
                field: "album",
                found: metadata.album.clone(),
                forcing: false,
            });
        }
        if metadata.title != entry.name {
            mismatches.push(Mismatch {
                field: "title",
                found: metadata.title.clone(),
                forcing: false,
            });
        }
        if !contains_any_ignore_case(&metadata.artist, &entry.singers) {
            mismatches.push(Mismatch {
                field: "artist",
                found: metadata.artist.clone(),
                forcing: false,
            });
        }
        if !metadata.artist.contains(&task.keyword) {
            mismatches.push(Mismatch {
                field: "keyword",
                found: metadata.artist.clone(),
                forcing: true,
            });
        }

        let relative = path.strip_prefix(&task.base_dir).unwrap_or(path);
        if let Some(keyword) = self.blacklist.matches_path(relative) {
            mismatches.push(Mismatch {
                field: "excluded",
                found: keyword.to_string(),
                forcing: true,
            });
        }

        mismatches
    }
}

pub(crate) fn should_discard(mismatches: &[Mismatch]) -> bool {
    mismatches.len() > MAX_MISMATCHES || mismatches.iter().any(|mismatch| mismatch.forcing)
}

fn remove_download(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Failed to delete {}: {}", path.display(), err);
    }
}
