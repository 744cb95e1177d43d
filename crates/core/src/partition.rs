//! Batch partitioning for a distillation round.
//! Files are grouped by count, by greedy size packing or by a balanced
//! worst-fit-decreasing heap so each external call gets a bounded payload.

use crate::error::DistillError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, trace};

/// How files are grouped into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Fixed-size contiguous chunks, input order preserved.
    Count,
    /// Greedy packing by size with large files isolated.
    Size,
    /// Worst-fit-decreasing packing for even batch sizes.
    Balanced,
}

impl FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(BatchMode::Count),
            "size" => Ok(BatchMode::Size),
            "balanced" => Ok(BatchMode::Balanced),
            other => Err(format!(
                "unknown batch mode `{other}` (expected count, size or balanced)"
            )),
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchMode::Count => "count",
            BatchMode::Size => "size",
            BatchMode::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

/// Thresholds used by the partitioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub mode: BatchMode,
    /// Maximum number of files per batch.
    pub batch_size: usize,
    /// Byte budget per batch in the size-aware modes.
    pub max_batch_bytes: u64,
    /// Files at or above this size get their own batch in `Size` mode.
    pub large_file_bytes: u64,
}

/// A file paired with its size on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

impl SizedFile {
    /// Read the size of `path` from the filesystem.
    pub fn stat(path: &Path) -> Result<Self, DistillError> {
        let meta = std::fs::metadata(path).map_err(|source| DistillError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes: meta.len(),
        })
    }
}

/// Stat every path, failing on the first unreadable one.
pub fn stat_all(paths: &[PathBuf]) -> Result<Vec<SizedFile>, DistillError> {
    paths.iter().map(|p| SizedFile::stat(p)).collect()
}

/// Files assigned to one external summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position of the batch within its round.
    pub index: usize,
    pub files: Vec<SizedFile>,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Split `files` into numbered batches according to `cfg.mode`.
pub fn partition(files: Vec<SizedFile>, cfg: &PartitionConfig) -> Vec<Batch> {
    trace!(
        "partition files={} mode={} batch_size={} max_batch_bytes={} large_file_bytes={}",
        files.len(),
        cfg.mode,
        cfg.batch_size,
        cfg.max_batch_bytes,
        cfg.large_file_bytes
    );
    let groups = match cfg.mode {
        BatchMode::Count => by_count(files, cfg.batch_size),
        BatchMode::Size => by_greedy_size(
            files,
            cfg.batch_size,
            cfg.max_batch_bytes,
            cfg.large_file_bytes,
        ),
        BatchMode::Balanced => balanced(files, cfg.batch_size, cfg.max_batch_bytes),
    };
    groups
        .into_iter()
        .enumerate()
        .map(|(i, files)| Batch {
            index: i + 1,
            files,
        })
        .collect()
}

/// Contiguous chunks of `batch_size` files.
fn by_count(files: Vec<SizedFile>, batch_size: usize) -> Vec<Vec<SizedFile>> {
    let size = batch_size.max(1);
    let mut groups = Vec::with_capacity(files.len().div_ceil(size));
    let mut iter = files.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(size).collect());
    }
    groups
}

/// Largest-first greedy packing. Files at or above `large_file_bytes` are
/// isolated; the rest fill a running batch until the byte budget or the
/// file cap would be exceeded.
fn by_greedy_size(
    mut files: Vec<SizedFile>,
    batch_size: usize,
    max_batch_bytes: u64,
    large_file_bytes: u64,
) -> Vec<Vec<SizedFile>> {
    let cap = batch_size.max(1);
    files.sort_by(|a, b| b.bytes.cmp(&a.bytes));

    let mut groups = Vec::new();
    let mut current: Vec<SizedFile> = Vec::new();
    let mut current_bytes = 0u64;
    for file in files {
        if file.bytes >= large_file_bytes {
            debug!(
                "isolating large file {} ({:.2} KB)",
                file.path.display(),
                file.bytes as f64 / 1024.0
            );
            groups.push(vec![file]);
            continue;
        }
        if !current.is_empty()
            && (current_bytes.saturating_add(file.bytes) > max_batch_bytes || current.len() >= cap)
        {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += file.bytes;
        current.push(file);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[derive(Default)]
struct Bin {
    files: Vec<SizedFile>,
    bytes: u64,
}

/// Worst-fit-decreasing packing over `ceil(n / batch_size)` bins.
///
/// Each file goes into the lightest bin that still has room. Bins that reach
/// the file cap leave the heap. A new bin is opened only when the lightest
/// open bin cannot take the file without going over `max_batch_bytes`, so a
/// file bigger than the budget always ends up alone.
fn balanced(
    mut files: Vec<SizedFile>,
    batch_size: usize,
    max_batch_bytes: u64,
) -> Vec<Vec<SizedFile>> {
    if files.is_empty() {
        return Vec::new();
    }
    let cap = batch_size.max(1);
    files.sort_by(|a, b| b.bytes.cmp(&a.bytes));

    let target = files.len().div_ceil(cap);
    let mut bins: Vec<Bin> = (0..target).map(|_| Bin::default()).collect();
    // Ties on size go to the bin opened first.
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..target).map(|idx| Reverse((0, idx))).collect();

    for file in files {
        let slot = heap.pop().map(|Reverse((_, idx))| idx);
        match slot {
            Some(idx)
                if bins[idx].files.is_empty()
                    || bins[idx].bytes.saturating_add(file.bytes) <= max_batch_bytes =>
            {
                let bin = &mut bins[idx];
                bin.bytes += file.bytes;
                bin.files.push(file);
                if bin.files.len() < cap {
                    heap.push(Reverse((bin.bytes, idx)));
                }
            }
            other => {
                if let Some(idx) = other {
                    heap.push(Reverse((bins[idx].bytes, idx)));
                }
                trace!("opening extra bin for {}", file.path.display());
                let idx = bins.len();
                let bytes = file.bytes;
                bins.push(Bin {
                    files: vec![file],
                    bytes,
                });
                if cap > 1 {
                    heap.push(Reverse((bytes, idx)));
                }
            }
        }
    }

    bins.into_iter()
        .filter(|b| !b.files.is_empty())
        .map(|b| b.files)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sized(sizes: &[u64]) -> Vec<SizedFile> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &bytes)| SizedFile {
                path: PathBuf::from(format!("f{i:03}.vtt")),
                bytes,
            })
            .collect()
    }

    fn cfg(mode: BatchMode, batch_size: usize, max: u64, large: u64) -> PartitionConfig {
        PartitionConfig {
            mode,
            batch_size,
            max_batch_bytes: max,
            large_file_bytes: large,
        }
    }

    fn totals(batches: &[Batch]) -> Vec<u64> {
        batches.iter().map(|b| b.total_bytes()).collect()
    }

    /// No files, no batches, in every mode.
    #[test]
    fn empty_input_gives_no_batches() {
        for mode in [BatchMode::Count, BatchMode::Size, BatchMode::Balanced] {
            assert!(partition(Vec::new(), &cfg(mode, 3, 100, 50)).is_empty());
        }
    }

    /// Verify count mode keeps input order in fixed chunks.
    #[test]
    fn count_mode_chunks_in_order() {
        let batches = partition(sized(&[1; 10]), &cfg(BatchMode::Count, 3, 0, 0));
        let lens: Vec<usize> = batches.iter().map(|b| b.files.len()).collect();
        assert_eq!(lens, vec![3, 3, 3, 1]);
        assert_eq!(batches[0].files[0].path, PathBuf::from("f000.vtt"));
        assert_eq!(batches[3].files[0].path, PathBuf::from("f009.vtt"));
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    /// Files over the large threshold get their own batch.
    #[test]
    fn greedy_isolates_large_files_first() {
        let batches = partition(
            sized(&[5, 120, 30, 60, 10]),
            &cfg(BatchMode::Size, 10, 70, 100),
        );
        assert_eq!(totals(&batches), vec![120, 60, 45]);
        assert_eq!(batches[0].files.len(), 1);
    }

    /// Ensure greedy packing never exceeds the per-batch file cap.
    #[test]
    fn greedy_respects_file_cap() {
        let batches = partition(sized(&[1; 5]), &cfg(BatchMode::Size, 2, 1_000, 1_000));
        let lens: Vec<usize> = batches.iter().map(|b| b.files.len()).collect();
        assert_eq!(lens, vec![2, 2, 1]);
    }

    /// A file above the byte budget is never packed with others.
    #[test]
    fn greedy_keeps_over_budget_file_alone() {
        // 80 is below the large threshold but above the budget.
        let batches = partition(sized(&[80, 10, 10]), &cfg(BatchMode::Size, 10, 50, 100));
        assert_eq!(totals(&batches), vec![80, 20]);
    }

    /// Small files fill the lighter bins around a large one.
    #[test]
    fn balanced_spreads_small_files_around_large_one() {
        let batches = partition(
            sized(&[10, 1, 1, 1, 1]),
            &cfg(BatchMode::Balanced, 2, u64::MAX, u64::MAX),
        );
        assert_eq!(totals(&batches), vec![10, 2, 2]);
        assert_eq!(batches[0].files[0].path, PathBuf::from("f000.vtt"));
    }

    /// Verify balanced mode opens an extra bin for an oversize file.
    #[test]
    fn balanced_isolates_file_over_budget() {
        let batches = partition(
            sized(&[500, 20, 20, 20]),
            &cfg(BatchMode::Balanced, 4, 100, u64::MAX),
        );
        assert_eq!(totals(&batches), vec![500, 60]);
        assert_eq!(batches[0].files.len(), 1);
    }

    /// Batch modes parse case-insensitively and print lowercase.
    #[test]
    fn parses_batch_mode() {
        assert_eq!("Balanced".parse::<BatchMode>().unwrap(), BatchMode::Balanced);
        assert_eq!("count".parse::<BatchMode>().unwrap(), BatchMode::Count);
        assert!("heap".parse::<BatchMode>().is_err());
        assert_eq!(BatchMode::Size.to_string(), "size");
    }

    /// Ensure stat errors carry the offending path.
    #[test]
    fn stat_reports_missing_file() {
        let err = SizedFile::stat(Path::new("/definitely/not/here.vtt")).unwrap_err();
        assert!(matches!(err, DistillError::Stat { .. }));
    }

    fn mode_strategy() -> impl Strategy<Value = BatchMode> {
        prop_oneof![
            Just(BatchMode::Count),
            Just(BatchMode::Size),
            Just(BatchMode::Balanced)
        ]
    }

    proptest! {
        /// Every input appears in exactly one batch.
        #[test]
        fn every_file_lands_in_exactly_one_batch(
            sizes in prop::collection::vec(0u64..5_000, 1..60),
            mode in mode_strategy(),
            batch_size in 1usize..10,
            max in 1u64..8_000,
            large in 1u64..8_000,
        ) {
            let files = sized(&sizes);
            let batches = partition(files.clone(), &cfg(mode, batch_size, max, large));
            let mut seen = HashSet::new();
            for batch in &batches {
                prop_assert!(!batch.files.is_empty());
                prop_assert!(batch.files.len() <= batch_size);
                for f in &batch.files {
                    prop_assert!(seen.insert(f.path.clone()));
                }
            }
            prop_assert_eq!(seen.len(), files.len());
        }

        /// Count batches are full except possibly the last.
        #[test]
        fn count_mode_batches_are_full_except_last(
            n in 1usize..80,
            k in 1usize..12,
        ) {
            let batches = partition(sized(&vec![1; n]), &cfg(BatchMode::Count, k, 0, 0));
            let (last, rest) = batches.split_last().unwrap();
            prop_assert!(rest.iter().all(|b| b.files.len() == k));
            prop_assert!(!last.files.is_empty() && last.files.len() <= k);
        }

        /// Multi-file batches stay within the byte budget.
        #[test]
        fn size_aware_batches_stay_within_budget(
            sizes in prop::collection::vec(0u64..5_000, 1..60),
            balanced_mode in any::<bool>(),
            batch_size in 1usize..10,
            max in 1u64..8_000,
            large in 1u64..8_000,
        ) {
            let mode = if balanced_mode { BatchMode::Balanced } else { BatchMode::Size };
            let batches = partition(sized(&sizes), &cfg(mode, batch_size, max, large));
            for batch in &batches {
                prop_assert!(batch.total_bytes() <= max || batch.files.len() == 1);
            }
        }

        /// Balanced totals differ by at most the largest file.
        #[test]
        fn balanced_spread_is_bounded_by_largest_file(
            sizes in prop::collection::vec(0u64..5_000, 1..60),
            batch_size in 1usize..10,
        ) {
            let batches = partition(
                sized(&sizes),
                &cfg(BatchMode::Balanced, batch_size, u64::MAX, u64::MAX),
            );
            let t = totals(&batches);
            let spread = t.iter().max().unwrap() - t.iter().min().unwrap();
            prop_assert!(spread <= *sizes.iter().max().unwrap());
            prop_assert_eq!(batches.len(), sizes.len().div_ceil(batch_size));
        }
    }
}
