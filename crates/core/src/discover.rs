//! Source file discovery.

use crate::error::DistillError;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Whether `name` ends with `extension`, ignoring case and an optional
/// leading dot on the extension.
pub fn has_extension(name: &str, extension: &str) -> bool {
    let suffix = format!(".{}", extension.trim_start_matches('.')).to_lowercase();
    let name = name.to_lowercase();
    name.len() > suffix.len() && name.ends_with(&suffix)
}

/// Recursively collect files under `root` whose name ends with `extension`.
/// Anything under `exclude` (usually the output directory) is skipped.
/// The result is sorted by path.
pub fn find_files(
    root: &Path,
    extension: &str,
    exclude: Option<&Path>,
) -> Result<Vec<PathBuf>, DistillError> {
    trace!("find_files root={} extension={}", root.display(), extension);
    let excluded = exclude.and_then(|p| p.canonicalize().ok());
    let skip = |entry: &DirEntry| {
        entry.file_type().is_dir()
            && excluded
                .as_deref()
                .is_some_and(|ex| entry.path().canonicalize().is_ok_and(|p| p == ex))
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|e| !skip(e)) {
        let entry = entry.map_err(|source| DistillError::Walk {
            dir: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if has_extension(&entry.file_name().to_string_lossy(), extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    debug!("found {} `{}` files under {}", files.len(), extension, root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Extension matching ignores case and the leading dot.
    #[test]
    fn matches_extension_loosely() {
        assert!(has_extension("talk.en.vtt", ".vtt"));
        assert!(has_extension("TALK.VTT", "vtt"));
        assert!(has_extension("talk.en.vtt", ".en.vtt"));
        assert!(!has_extension("talk.srt", ".vtt"));
        assert!(!has_extension(".vtt", ".vtt"));
    }

    /// Verify recursion, sorting and output dir exclusion.
    #[test]
    fn walks_tree_and_skips_output_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("channel/playlist")).unwrap();
        fs::create_dir_all(root.join("distilled_output")).unwrap();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("channel/a.txt"), "a").unwrap();
        fs::write(root.join("channel/playlist/c.txt"), "c").unwrap();
        fs::write(root.join("channel/skip.vtt"), "x").unwrap();
        fs::write(root.join("distilled_output/round_1_batch_1.txt"), "o").unwrap();

        let files = find_files(root, ".txt", Some(&root.join("distilled_output"))).unwrap();
        assert_eq!(
            files,
            vec![
                root.join("b.txt"),
                root.join("channel/a.txt"),
                root.join("channel/playlist/c.txt"),
            ]
        );
    }

    /// Ensure a missing root surfaces as a walk error.
    #[test]
    fn missing_root_is_an_error() {
        let err = find_files(Path::new("/no/such/source/dir"), ".vtt", None).unwrap_err();
        assert!(matches!(err, DistillError::Walk { .. }));
    }
}
