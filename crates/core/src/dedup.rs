//! Content-hash deduplication of subtitle files.
//! Duplicates are moved into a quarantine folder instead of being deleted.

use crate::discover::has_extension;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Folder created under the base directory when no quarantine is given.
pub const DEFAULT_QUARANTINE_DIR: &str = "deduplicated_quarantine";

/// Options for a deduplication pass.
#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub base_dir: PathBuf,
    pub extension: String,
    /// Defaults to [`DEFAULT_QUARANTINE_DIR`] under `base_dir`.
    pub quarantine_dir: Option<PathBuf>,
    /// Report what would move without touching any file.
    pub dry_run: bool,
}

impl DedupOptions {
    pub fn quarantine(&self) -> PathBuf {
        self.quarantine_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_QUARANTINE_DIR))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A duplicate that could not be moved and was left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMove {
    pub from: PathBuf,
    pub to: PathBuf,
    pub error: String,
}

/// Files sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub kept: PathBuf,
    pub moved: Vec<MovedFile>,
    pub failed: Vec<FailedMove>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupReport {
    pub dry_run: bool,
    pub quarantine: PathBuf,
    /// Distinct physical files hashed.
    pub scanned: usize,
    pub groups: Vec<DuplicateGroup>,
}

impl DedupReport {
    pub fn moved_count(&self) -> usize {
        self.groups.iter().map(|g| g.moved.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.groups.iter().map(|g| g.failed.len()).sum()
    }
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn physical_id(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn physical_id(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Find files under `opts.base_dir` with identical contents and move every
/// copy but the first (in path order) into the quarantine folder.
/// A copy that cannot be moved is logged, left in place and listed in
/// [`DuplicateGroup::failed`].
pub fn deduplicate(opts: &DedupOptions) -> Result<DedupReport> {
    deduplicate_with(opts, move_file)
}

fn deduplicate_with<F>(opts: &DedupOptions, mut mover: F) -> Result<DedupReport>
where
    F: FnMut(&Path, &Path) -> Result<()>,
{
    trace!("deduplicate base_dir={}", opts.base_dir.display());
    let quarantine = opts.quarantine();
    if opts.dry_run {
        info!("dry run, no files will be moved");
    }

    let excluded = quarantine.canonicalize().ok();
    let mut seen_ids = HashSet::new();
    let mut seen_paths = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    let mut by_hash: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut scanned = 0;

    let walker = WalkDir::new(&opts.base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && excluded
                    .as_deref()
                    .is_some_and(|ex| e.path().canonicalize().is_ok_and(|p| p == ex)))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("scan {}", opts.base_dir.display()))?;
        if !entry.file_type().is_file()
            || !has_extension(&entry.file_name().to_string_lossy(), &opts.extension)
        {
            continue;
        }
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        // Hard links and repeated paths point at one physical file.
        if let Some(id) = physical_id(&meta) {
            if !seen_ids.insert(id) {
                debug!("already scanned {}", path.display());
                continue;
            }
        }
        let real = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !seen_paths.insert(real.clone()) {
            continue;
        }
        let hash = match hash_file(&real) {
            Ok(hash) => hash,
            Err(err) => {
                warn!("skipping {}: {err:#}", path.display());
                continue;
            }
        };
        scanned += 1;
        by_hash
            .entry(hash.clone())
            .or_insert_with(|| {
                order.push(hash);
                Vec::new()
            })
            .push(real);
    }

    let mut planned = HashSet::new();
    let mut groups = Vec::new();
    for hash in order {
        let Some(mut paths) = by_hash.remove(&hash) else {
            continue;
        };
        if paths.len() < 2 {
            continue;
        }
        let kept = paths.remove(0);
        info!(
            "found {} copies of {} (hash {}), keeping it",
            paths.len() + 1,
            kept.display(),
            &hash[..12]
        );
        if !opts.dry_run {
            fs::create_dir_all(&quarantine)
                .with_context(|| format!("create {}", quarantine.display()))?;
        }
        let mut moved = Vec::with_capacity(paths.len());
        let mut failed = Vec::new();
        for from in paths {
            let to = free_destination(&quarantine, &from, &mut planned);
            if opts.dry_run {
                info!("would move {} to {}", from.display(), to.display());
            } else if let Err(err) = mover(&from, &to) {
                warn!("could not move {}: {err:#}", from.display());
                planned.remove(&to);
                failed.push(FailedMove {
                    from,
                    to,
                    error: format!("{err:#}"),
                });
                continue;
            } else {
                info!("moved {} to {}", from.display(), to.display());
            }
            moved.push(MovedFile { from, to });
        }
        groups.push(DuplicateGroup {
            hash,
            kept,
            moved,
            failed,
        });
    }

    let report = DedupReport {
        dry_run: opts.dry_run,
        quarantine,
        scanned,
        groups,
    };
    info!(
        "deduplication complete: {} files {}moved to quarantine",
        report.moved_count(),
        if opts.dry_run { "would be " } else { "" }
    );
    if report.failed_count() > 0 {
        warn!("{} duplicates could not be moved", report.failed_count());
    }
    Ok(report)
}

/// Pick `name`, `name_1`, `name_2`, ... inside `dir`, skipping names that
/// exist on disk or were already handed out.
fn free_destination(dir: &Path, from: &Path, planned: &mut HashSet<PathBuf>) -> PathBuf {
    let stem = from.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    let ext = from
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut candidate = dir.join(from.file_name().unwrap_or_default());
    let mut counter = 1;
    while candidate.exists() || planned.contains(&candidate) {
        candidate = dir.join(format!("{stem}_{counter}{ext}"));
        counter += 1;
    }
    planned.insert(candidate.clone());
    candidate
}

/// Rename, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("remove {}", from.display()))?;
    Ok(())
}
