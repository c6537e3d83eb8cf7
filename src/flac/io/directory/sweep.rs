//! After-the-fact reconciliation of an existing download tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::flac::blacklist::Blacklist;
use crate::flac::io::directory::{SIDECAR_DIR, is_empty_dir, is_music_file, prune_empty_upward};
use crate::flac::io::tags::TagReader;

#[derive(Error, Debug)]
pub(crate) enum SweepError {
    #[error("Sweep root is not a directory: {0}")]
    MissingRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub(crate) type SweepResult<T> = Result<T, SweepError>;

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepSummary {
    pub removed_title_mismatch: usize,
    pub removed_excluded: usize,
    pub dirs_pruned: usize,
    pub unreadable: usize,
}

impl SweepSummary {
    pub(crate) fn absorb(&mut self, other: SweepSummary) {
        self.removed_title_mismatch += other.removed_title_mismatch;
        self.removed_excluded += other.removed_excluded;
        self.dirs_pruned += other.dirs_pruned;
        self.unreadable += other.unreadable;
    }

    pub(crate) fn files_removed(&self) -> usize {
        self.removed_title_mismatch + self.removed_excluded
    }
}

/// Walks a download tree, deleting audio files whose embedded title disagrees with the file name
/// or whose path hits the blacklist, then prunes whatever directories that leaves empty.
pub(crate) struct Sweeper {
    tag_reader: Arc<dyn TagReader>,
    blacklist: Blacklist,
    cover_file_name: String,
}

impl Sweeper {
    pub(crate) fn new(tag_reader: Arc<dyn TagReader>, blacklist: Blacklist, cover_file_name: &str) -> Self {
        Sweeper {
            tag_reader,
            blacklist,
            cover_file_name: cover_file_name.to_string(),
        }
    }

    /// Runs one pass over `root`. The root itself is never deleted.
    ///
    /// Directories are only collected during the walk; they are removed afterwards, each one
    /// cascading upward through parents that became empty.
    pub(crate) fn sweep(&self, root: &Path) -> SweepResult<SweepSummary> {
        if !root.is_dir() {
            return Err(SweepError::MissingRoot(root.to_path_buf()));
        }

        let mut summary = SweepSummary::default();
        let mut candidates: Vec<PathBuf> = Vec::new();

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| !is_sidecar_dir(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error accessing path under {}: {}", root.display(), err);
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                if path != root && is_empty_dir(path, &self.cover_file_name)? {
                    trace!("Marking empty directory: {}", path.display());
                    candidates.push(path.to_path_buf());
                }
                continue;
            }

            if !is_music_file(path) {
                continue;
            }

            if let Some(reason) = self.removal_reason(root, path, &mut summary) {
                info!("Deleting {} ({})", path.display(), reason);
                if let Err(err) = fs::remove_file(path) {
                    warn!("Failed to delete {}: {}", path.display(), err);
                    continue;
                }
                match reason {
                    Removal::TitleMismatch => summary.removed_title_mismatch += 1,
                    Removal::Excluded(_) => summary.removed_excluded += 1,
                }
                if let Some(parent) = path.parent() {
                    candidates.push(parent.to_path_buf());
                }
            }
        }

        for dir in candidates {
            let removed = prune_empty_upward(&dir, root, &self.cover_file_name)?;
            summary.dirs_pruned += removed.len();
        }

        debug!("Sweep of {} finished: {:?}", root.display(), summary);
        Ok(summary)
    }

    fn removal_reason(&self, root: &Path, path: &Path, summary: &mut SweepSummary) -> Option<Removal> {
        let metadata = match self.tag_reader.read_tags(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Keeping unreadable file {}: {}", path.display(), err);
                summary.unreadable += 1;
                return None;
            }
        };

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem != metadata.title.to_lowercase() {
            trace!("File name \"{}\" does not match title \"{}\"", stem, metadata.title);
            return Some(Removal::TitleMismatch);
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        self.blacklist
            .matches_path(relative)
            .map(|keyword| Removal::Excluded(keyword.to_string()))
    }
}

enum Removal {
    TitleMismatch,
    Excluded(String),
}

impl std::fmt::Display for Removal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Removal::TitleMismatch => write!(f, "title mismatch"),
            Removal::Excluded(keyword) => write!(f, "excluded keyword \"{keyword}\""),
        }
    }
}

fn is_sidecar_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == SIDECAR_DIR
}
