//! Subtitle cleaning.
//! Turns raw WebVTT captions into a compact list of unique spoken lines so
//! the distiller sends less noise to the model.

use crate::discover::has_extension;
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Marker inserted before the extension of cleaned files.
pub const CLEANED_MARKER: &str = "cleaned";

/// Options for a cleaning pass over a folder tree.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub base_dir: PathBuf,
    pub extension: String,
    /// Delete each source file once its cleaned copy is written.
    pub remove_original: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedClean {
    pub source: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub cleaned: Vec<CleanedFile>,
    pub failed: Vec<FailedClean>,
}

fn tag_regex() -> Result<&'static Regex> {
    static TAG_RE: OnceCell<Regex> = OnceCell::new();
    TAG_RE.get_or_try_init(|| Regex::new(r"<[^>]*>").context("failed to compile tag regex"))
}

fn space_regex() -> Result<&'static Regex> {
    static SPACE_RE: OnceCell<Regex> = OnceCell::new();
    SPACE_RE.get_or_try_init(|| Regex::new(r"\s+").context("failed to compile space regex"))
}

/// Clean one caption file's text.
///
/// Drops the `WEBVTT` header, `Kind:`/`Language:` metadata and cue timing
/// lines, strips inline tags and `&gt;&gt;` speaker markers, collapses
/// whitespace and keeps the first occurrence of each line as `- line`.
pub fn clean_vtt(text: &str) -> Result<String> {
    let tags = tag_regex()?;
    let spaces = space_regex()?;
    let mut seen = HashSet::new();
    let mut out = String::new();
    for line in text.lines() {
        if line.trim() == "WEBVTT" || line.contains("Kind:") || line.contains("Language:") {
            continue;
        }
        if line.contains("-->") {
            continue;
        }
        let line = tags.replace_all(line, "");
        let line = line.replace("&gt;&gt;", "");
        let line = spaces.replace_all(&line, " ");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = format!("- {line}");
        if seen.insert(entry.clone()) {
            out.push_str(&entry);
            out.push('\n');
        }
    }
    Ok(out)
}

/// `talk.en.vtt` becomes `talk.en.cleaned.vtt` for extension `.vtt`.
pub fn cleaned_path(path: &Path, extension: &str) -> PathBuf {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    let cut = name.len().saturating_sub(suffix.len());
    let (stem, ext) = if has_extension(&name, extension) && name.is_char_boundary(cut) {
        name.split_at(cut)
    } else {
        (&*name, suffix.as_str())
    };
    path.with_file_name(format!("{stem}.{CLEANED_MARKER}{ext}"))
}

fn is_cleaned(name: &str) -> bool {
    name.to_lowercase().contains(&format!(".{CLEANED_MARKER}."))
}

/// Clean `source` into `output`, returning the number of lines kept.
pub fn clean_file(source: &Path, output: &Path) -> Result<usize> {
    trace!("clean_file source={}", source.display());
    let bytes = fs::read(source).with_context(|| format!("read {}", source.display()))?;
    let cleaned = clean_vtt(&String::from_utf8_lossy(&bytes))?;
    fs::write(output, &cleaned).with_context(|| format!("write {}", output.display()))?;
    Ok(cleaned.lines().count())
}

/// Clean every matching file under `opts.base_dir`, writing the result next
/// to the source. Files that already carry the cleaned marker are skipped.
/// A file that fails is logged and listed in the report.
pub fn clean_tree(opts: &CleanOptions) -> Result<CleanReport> {
    trace!("clean_tree base_dir={}", opts.base_dir.display());
    let mut sources = Vec::new();
    for entry in WalkDir::new(&opts.base_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scan {}", opts.base_dir.display()))?;
        let wanted = entry.file_type().is_file() && {
            let name = entry.file_name().to_string_lossy();
            has_extension(&name, &opts.extension) && !is_cleaned(&name)
        };
        if wanted {
            sources.push(entry.into_path());
        }
    }
    debug!("{} files to clean", sources.len());

    let mut report = CleanReport::default();
    for source in sources {
        let output = cleaned_path(&source, &opts.extension);
        let result = clean_file(&source, &output).and_then(|lines| {
            if opts.remove_original {
                fs::remove_file(&source)
                    .with_context(|| format!("remove {}", source.display()))?;
            }
            Ok(lines)
        });
        match result {
            Ok(lines) => {
                info!("cleaned {} ({lines} lines)", source.display());
                report.cleaned.push(CleanedFile {
                    source,
                    output,
                    lines,
                });
            }
            Err(err) => {
                warn!("could not clean {}: {err:#}", source.display());
                report.failed.push(FailedClean {
                    source,
                    error: format!("{err:#}"),
                });
            }
        }
    }
    info!(
        "cleaning complete: {} cleaned, {} failed",
        report.cleaned.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "WEBVTT\nKind: captions\nLanguage: en\n\n\
00:00:00.000 --> 00:00:02.000 align:start position:0%\n\
hello<00:00:00.500><c> world</c>\n\n\
00:00:02.000 --> 00:00:04.000\n\
&gt;&gt; hello   world\n\
next   line\n";

    /// Header, metadata and cue timings never reach the output.
    #[test]
    fn drops_header_metadata_and_timings() {
        let out = clean_vtt(SAMPLE).unwrap();
        assert!(!out.contains("WEBVTT"));
        assert!(!out.contains("Kind:"));
        assert!(!out.contains("Language:"));
        assert!(!out.contains("-->"));
    }

    /// Inline tags and speaker markers are stripped and spacing collapsed,
    /// which makes the repeated caption a duplicate.
    #[test]
    fn strips_tags_and_deduplicates() {
        assert_eq!(clean_vtt(SAMPLE).unwrap(), "- hello world\n- next line\n");
    }

    /// Lines that are empty after cleaning are dropped.
    #[test]
    fn skips_lines_emptied_by_cleaning() {
        assert_eq!(clean_vtt("<c></c>\n&gt;&gt;\n   \nok\n").unwrap(), "- ok\n");
    }

    /// Cleaned names keep the stem and insert the marker before the extension.
    #[test]
    fn names_cleaned_copy() {
        assert_eq!(
            cleaned_path(Path::new("/s/talk.en.vtt"), ".vtt"),
            PathBuf::from("/s/talk.en.cleaned.vtt")
        );
        assert_eq!(
            cleaned_path(Path::new("/s/TALK.VTT"), "vtt"),
            PathBuf::from("/s/TALK.cleaned.VTT")
        );
    }

    /// A tree pass cleans new files, skips cleaned ones and can drop originals.
    #[test]
    fn cleans_tree_and_removes_originals() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("channel")).unwrap();
        fs::write(base.join("channel/a.vtt"), SAMPLE).unwrap();
        fs::write(base.join("channel/b.cleaned.vtt"), "- done\n").unwrap();
        fs::write(base.join("channel/notes.txt"), SAMPLE).unwrap();

        let report = clean_tree(&CleanOptions {
            base_dir: base.to_path_buf(),
            extension: ".vtt".into(),
            remove_original: true,
        })
        .unwrap();

        assert_eq!(report.cleaned.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(report.cleaned[0].lines, 2);
        assert!(!base.join("channel/a.vtt").exists());
        assert_eq!(
            fs::read_to_string(base.join("channel/a.cleaned.vtt")).unwrap(),
            "- hello world\n- next line\n"
        );
        assert_eq!(
            fs::read_to_string(base.join("channel/b.cleaned.vtt")).unwrap(),
            "- done\n"
        );
        assert!(base.join("channel/notes.txt").exists());
    }

    /// Running twice without removal leaves a single cleaned copy per source.
    #[test]
    fn second_pass_does_not_reclean_outputs() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::write(base.join("a.vtt"), SAMPLE).unwrap();
        let opts = CleanOptions {
            base_dir: base.to_path_buf(),
            extension: ".vtt".into(),
            remove_original: false,
        };
        clean_tree(&opts).unwrap();
        let again = clean_tree(&opts).unwrap();
        assert_eq!(again.cleaned.len(), 1);
        assert!(!base.join("a.cleaned.cleaned.vtt").exists());
    }
}
