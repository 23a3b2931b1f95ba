//! Resolve a JobSpec into an ordered transfer plan.
//!
//! Directories are walked recursively and the relative layout is recreated
//! under the destination; single-file sources land directly beneath it.
//! Exclusion patterns are plain substring matches against the path
//! relative to the source root, never against the directories above it.
//! Incremental jobs skip files whose destination is already current.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BexError;
use crate::job::JobSpec;

/// One file to copy: resolved source, destination path, and size.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub len: u64,
}

/// Ordered list of files for one execution. The spec-level byte stream
/// (total bytes, resume offset) is the concatenation of these entries.
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub entries: Vec<FileEntry>,
    pub total_bytes: u64,
}

/// `rel` is the path below the source root (the bare file name for
/// single-file sources).
fn excluded(rel: &Path, patterns: &[String]) -> bool {
    let s = rel.to_string_lossy();
    patterns.iter().any(|p| !p.is_empty() && s.contains(p.as_str()))
}

/// Incremental mode: a destination counts as current when it is a file of
/// the same size whose mtime is not older than the source's.
fn up_to_date(source_meta: &std::fs::Metadata, dest: &Path) -> bool {
    let Ok(dest_meta) = std::fs::metadata(dest) else {
        return false;
    };
    if !dest_meta.is_file() || dest_meta.len() != source_meta.len() {
        return false;
    }
    match (source_meta.modified(), dest_meta.modified()) {
        (Ok(src), Ok(dst)) => dst >= src,
        _ => false,
    }
}

fn push_file(plan: &mut TransferPlan, source: PathBuf, dest: PathBuf, len: u64) {
    plan.total_bytes += len;
    plan.entries.push(FileEntry { source, dest, len });
}

/// Build the transfer plan for a job. Fails with `SourceUnreachable` if a
/// source is missing or a directory cannot be read.
pub fn build_plan(spec: &JobSpec) -> Result<TransferPlan, BexError> {
    let mut plan = TransferPlan::default();

    for source in &spec.sources {
        let meta = std::fs::metadata(source).map_err(|e| BexError::SourceUnreachable {
            path: source.clone(),
            source: e,
        })?;

        if meta.is_file() {
            let file_name = source.file_name().ok_or_else(|| BexError::SourceUnreachable {
                path: source.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "source file has no name",
                ),
            })?;
            if excluded(Path::new(file_name), &spec.exclude) {
                continue;
            }
            let dest = spec.destination.join(file_name);
            if spec.incremental && up_to_date(&meta, &dest) {
                continue;
            }
            push_file(&mut plan, source.clone(), dest, meta.len());
            continue;
        }

        // Deterministic order so resume offsets stay aligned across attempts.
        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                BexError::SourceUnreachable {
                    path,
                    source: e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source)
                .expect("walked path is under its root");
            if excluded(rel, &spec.exclude) {
                continue;
            }
            let entry_meta = entry.metadata().map_err(|e| BexError::SourceUnreachable {
                path: entry.path().to_path_buf(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("metadata read failed")),
            })?;
            let dest = spec.destination.join(rel);
            if spec.incremental && up_to_date(&entry_meta, &dest) {
                continue;
            }
            push_file(&mut plan, entry.path().to_path_buf(), dest, entry_meta.len());
        }
    }

    Ok(plan)
}
