use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub(crate) mod sweep;

/// Thumbnail folder a Synology NAS drops into every directory it indexes.
pub(crate) const SIDECAR_DIR: &str = "@eaDir";

/// File names that never make a directory "non-empty", besides dotfiles.
const SIDECAR_FILES: [&str; 1] = ["Thumbs.db"];

/// Extensions the sweep treats as audio.
const MUSIC_EXTENSIONS: [&str; 5] = ["mp3", "flac", "wav", "aac", "m4a"];

/// Replaces characters that are illegal in file names on common file systems with `_`.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Checks the extension case-insensitively against the known audio formats.
pub(crate) fn is_music_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            MUSIC_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

fn is_hidden_entry(name: &str) -> bool {
    name.starts_with('.') || SIDECAR_FILES.contains(&name)
}

/// Whether `dir` holds nothing worth keeping.
///
/// A directory is empty when every entry is a dotfile or a known OS sidecar file, or when it holds
/// exactly the cover image and the NAS sidecar folder (an album whose tracks are all gone).
///
/// # Arguments
///
/// * `dir`: The directory to inspect.
/// * `cover_file_name`: Name of the cover image written next to the tracks.
pub(crate) fn is_empty_dir(dir: &Path, cover_file_name: &str) -> io::Result<bool> {
    let names: Vec<String> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    if names.len() == 2
        && names.iter().any(|name| name == cover_file_name)
        && names.iter().any(|name| name == SIDECAR_DIR)
    {
        return Ok(true);
    }

    Ok(names.iter().all(|name| is_hidden_entry(name)))
}

/// Deletes `dir` if it is empty, then keeps walking up through its parents while they are empty too.
///
/// Never deletes `root` or anything outside of it. A `dir` that no longer exists is skipped, since
/// whatever removed it already cascaded past it. Returns every directory that was deleted.
pub(crate) fn prune_empty_upward(
    dir: &Path,
    root: &Path,
    cover_file_name: &str,
) -> io::Result<Vec<PathBuf>> {
    prune_empty_upward_unless(dir, root, cover_file_name, |_| false)
}

/// Same as [prune_empty_upward], but the cascade also stops at the first directory for which
/// `in_use` returns true.
pub(crate) fn prune_empty_upward_unless<F>(
    dir: &Path,
    root: &Path,
    cover_file_name: &str,
    in_use: F,
) -> io::Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut removed = Vec::new();
    let mut current = dir.to_path_buf();

    loop {
        if current == root || !current.starts_with(root) {
            trace!("Reached root {}, stopping cascade", root.display());
            break;
        }
        if !current.is_dir() {
            break;
        }
        if in_use(&current) {
            trace!("Directory still in use: {}", current.display());
            break;
        }
        if !is_empty_dir(&current, cover_file_name)? {
            trace!("Directory is not empty: {}", current.display());
            break;
        }

        debug!("Deleting empty directory: {}", current.display());
        fs::remove_dir_all(&current)?;
        removed.push(current.clone());

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_replaces_illegal_chars() {
        assert_eq!(sanitize_file_name("AC/DC: Back <In> \"Black\"?|*\\"), "AC_DC_ Back _In_ _Black_____");
        assert_eq!(sanitize_file_name("晴天"), "晴天");
    }

    #[test]
    fn test_is_music_file() {
        assert!(is_music_file(Path::new("a/b/song.FLAC")));
        assert!(is_music_file(Path::new("song.m4a")));
        assert!(!is_music_file(Path::new("cover.jpg")));
        assert!(!is_music_file(Path::new("flac")));
    }

    #[test]
    fn test_cover_and_sidecar_dir_is_empty() {
        let dir = tempdir().unwrap();
        write(dir.path().join("cover.jpg"), b"jpg").unwrap();
        create_dir_all(dir.path().join(SIDECAR_DIR)).unwrap();

        assert!(is_empty_dir(dir.path(), "cover.jpg").unwrap());
    }

    #[test]
    fn test_hidden_file_only_is_empty() {
        let dir = tempdir().unwrap();
        write(dir.path().join(".DS_Store"), b"").unwrap();
        assert!(is_empty_dir(dir.path(), "cover.jpg").unwrap());

        write(dir.path().join("Thumbs.db"), b"").unwrap();
        assert!(is_empty_dir(dir.path(), "cover.jpg").unwrap());
    }

    #[test]
    fn test_audio_file_is_not_empty() {
        let dir = tempdir().unwrap();
        write(dir.path().join("song.flac"), b"fLaC").unwrap();
        assert!(!is_empty_dir(dir.path(), "cover.jpg").unwrap());
    }

    #[test]
    fn test_cover_alone_is_not_empty() {
        let dir = tempdir().unwrap();
        write(dir.path().join("cover.jpg"), b"jpg").unwrap();
        assert!(!is_empty_dir(dir.path(), "cover.jpg").unwrap());
    }

    #[test]
    fn test_prune_cascades_and_stops_at_root() {
        let root = tempdir().unwrap();
        let deep = root.path().join("A").join("B").join("C");
        create_dir_all(&deep).unwrap();

        let removed = prune_empty_upward(&deep, root.path(), "cover.jpg").unwrap();

        assert_eq!(removed.len(), 3);
        assert!(!root.path().join("A").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_prune_stops_at_non_empty_ancestor() {
        let root = tempdir().unwrap();
        let deep = root.path().join("A").join("B").join("C");
        create_dir_all(&deep).unwrap();
        write(root.path().join("A").join("keep.mp3"), b"ID3").unwrap();

        let removed = prune_empty_upward(&deep, root.path(), "cover.jpg").unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!root.path().join("A").join("B").exists());
        assert!(root.path().join("A").join("keep.mp3").exists());
    }

    #[test]
    fn test_prune_stops_at_directory_in_use() {
        let root = tempdir().unwrap();
        let deep = root.path().join("A").join("B").join("C");
        create_dir_all(&deep).unwrap();
        let busy = root.path().join("A").join("B");

        let removed = prune_empty_upward_unless(&deep, root.path(), "cover.jpg", |dir| dir == busy).unwrap();

        assert_eq!(removed, vec![deep.clone()]);
        assert!(busy.is_dir());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let root = tempdir().unwrap();
        let removed = prune_empty_upward(&root.path().join("gone"), root.path(), "cover.jpg").unwrap();
        assert!(removed.is_empty());
    }
}
