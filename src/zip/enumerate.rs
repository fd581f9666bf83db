//! Lazy, deterministic enumeration of filesystem inputs.
//!
//! Each input file becomes one candidate named after its base name. Each
//! input directory becomes a directory marker followed by its descendants,
//! visited depth-first in lexicographic file-name order. Symbolic links
//! are followed; a link that loops back to an ancestor fails the
//! enumeration with [`ZipError::SymlinkCycle`].

use std::fs::Metadata;
use std::iter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::path::{archive_name, relative_components};
use crate::error::{Result, ZipError};

/// One filesystem input with an optional archive-relative name override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: PathBuf,
    /// Replaces the base name as the root of the entry's archive path.
    /// An empty string places directory contents at the archive root.
    pub archive_name: Option<String>,
}

impl Source {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_name: None,
        }
    }

    pub fn with_name(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            archive_name: Some(name.into()),
        }
    }
}

impl<P: AsRef<Path>> From<&P> for Source {
    fn from(path: &P) -> Self {
        Self::new(path.as_ref())
    }
}

/// An entry the Writer will add, with the metadata it needs.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub archive_name: String,
    pub source: PathBuf,
    pub is_directory: bool,
    pub size: u64,
    pub modified: SystemTime,
    pub mode: u32,
}

/// Totals gathered by the sizing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sizing {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Enumerate every candidate below `sources`, in order.
pub fn enumerate(sources: &[Source]) -> impl Iterator<Item = Result<Candidate>> + '_ {
    enumerate_except(sources, None)
}

/// Count entries and regular-file bytes without keeping the candidates.
pub fn measure(sources: &[Source]) -> Result<Sizing> {
    measure_except(sources, None)
}

/// [`enumerate`], leaving out the file at the canonical path `skip`.
pub(crate) fn enumerate_except<'a>(
    sources: &'a [Source],
    skip: Option<&'a Path>,
) -> impl Iterator<Item = Result<Candidate>> + 'a {
    sources
        .iter()
        .flat_map(enumerate_source)
        .filter(move |candidate| match (candidate, skip) {
            (Ok(candidate), Some(skip)) => !is_skipped(candidate, skip),
            _ => true,
        })
}

/// [`measure`], leaving out the file at the canonical path `skip`.
pub(crate) fn measure_except(sources: &[Source], skip: Option<&Path>) -> Result<Sizing> {
    let mut sizing = Sizing::default();
    for candidate in enumerate_except(sources, skip) {
        let candidate = candidate?;
        sizing.entries += 1;
        if !candidate.is_directory {
            sizing.total_bytes += candidate.size;
        }
    }
    Ok(sizing)
}

fn enumerate_source(source: &Source) -> Box<dyn Iterator<Item = Result<Candidate>> + '_> {
    let path = source.path.as_path();
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return Box::new(iter::once(Err(ZipError::source_unreadable(path, e)))),
    };
    let root = match root_components(source) {
        Ok(r) => r,
        Err(e) => return Box::new(iter::once(Err(e))),
    };

    if !metadata.is_dir() {
        let name = archive_name(root.iter().map(String::as_str), false);
        return Box::new(iter::once(Ok(candidate(name, path, &metadata))));
    }

    let walker = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    Box::new(walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(walk_error(e))),
        };
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => return Some(Err(walk_error(e))),
        };
        if !metadata.is_dir() && !metadata.is_file() {
            warn!(path = %entry.path().display(), "skipping special file");
            return None;
        }

        let rel = match relative_components(entry.path(), path) {
            Ok(rel) => rel,
            Err(e) => return Some(Err(e)),
        };
        let name = archive_name(
            root.iter().chain(rel.iter()).map(String::as_str),
            metadata.is_dir(),
        );
        // Contents placed at the archive root have no marker for the root.
        if name.is_empty() {
            return None;
        }
        Some(Ok(candidate(name, entry.path(), &metadata)))
    }))
}

fn is_skipped(candidate: &Candidate, skip: &Path) -> bool {
    if candidate.is_directory || candidate.source.file_name() != skip.file_name() {
        return false;
    }
    let skipped = candidate
        .source
        .canonicalize()
        .is_ok_and(|path| path == skip);
    if skipped {
        debug!(path = %candidate.source.display(), "skipping the archive being written");
    }
    skipped
}

fn root_components(source: &Source) -> Result<Vec<String>> {
    if let Some(name) = &source.archive_name {
        return Ok(name
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(str::to_owned)
            .collect());
    }

    let base = match source.path.file_name() {
        Some(base) => Some(base.to_owned()),
        // "." or "..": name the entry after the directory they point at
        None => source
            .path
            .canonicalize()
            .map_err(|e| ZipError::source_unreadable(&source.path, e))?
            .file_name()
            .map(ToOwned::to_owned),
    };
    match base {
        Some(base) => relative_components(Path::new(&base), Path::new("")),
        None => Ok(Vec::new()),
    }
}

fn candidate(archive_name: String, source: &Path, metadata: &Metadata) -> Candidate {
    Candidate {
        archive_name,
        source: source.to_path_buf(),
        is_directory: metadata.is_dir(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
        mode: file_mode(metadata),
    }
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

fn walk_error(e: walkdir::Error) -> ZipError {
    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
    if e.loop_ancestor().is_some() {
        return ZipError::SymlinkCycle { path };
    }
    let io = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
    ZipError::source_unreadable(path, io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(sources: &[Source]) -> Vec<String> {
        enumerate(sources)
            .map(|c| c.unwrap().archive_name)
            .collect()
    }

    #[test]
    fn file_uses_base_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "hello").unwrap();
        assert_eq!(names(&[Source::new(temp.path().join("a.txt"))]), ["a.txt"]);
    }

    #[test]
    fn directory_is_sorted_and_nested() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::write(root.join("c.txt"), "c").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b/inner/d.txt"), "d").unwrap();

        assert_eq!(
            names(&[Source::new(&root)]),
            ["tree/", "tree/a.txt", "tree/b/", "tree/b/inner/", "tree/b/inner/d.txt", "tree/c.txt"]
        );
    }

    #[test]
    fn name_override_and_root_contents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("x.txt"), "x").unwrap();

        assert_eq!(names(&[Source::with_name(&root, "docs/v1")]), ["docs/v1/", "docs/v1/x.txt"]);
        assert_eq!(names(&[Source::with_name(&root, "")]), ["x.txt"]);
    }

    #[test]
    fn measure_counts_file_bytes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("x.txt"), "12345").unwrap();
        fs::write(temp.path().join("y.txt"), "123").unwrap();

        let sources = [Source::new(&root), Source::new(temp.path().join("y.txt"))];
        let sizing = measure(&sources).unwrap();
        assert_eq!(sizing, Sizing { entries: 3, total_bytes: 8 });
    }

    #[test]
    fn skipped_path_is_left_out() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("out.zip"), "partial").unwrap();
        let skip = root.join("out.zip").canonicalize().unwrap();

        let sources = [Source::new(&root)];
        let names: Vec<_> = enumerate_except(&sources, Some(&skip))
            .map(|c| c.unwrap().archive_name)
            .collect();
        assert_eq!(names, ["tree/", "tree/a.txt"]);
        let sizing = measure_except(&sources, Some(&skip)).unwrap();
        assert_eq!(sizing, Sizing { entries: 2, total_bytes: 1 });
    }

    #[test]
    fn missing_source_is_unreadable() {
        let temp = TempDir::new().unwrap();
        let err = measure(&[Source::new(temp.path().join("missing"))]).unwrap_err();
        assert!(matches!(err, ZipError::SourceUnreadable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_detected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&root, root.join("loop")).unwrap();

        let err = measure(&[Source::new(&root)]).unwrap_err();
        assert!(matches!(err, ZipError::SymlinkCycle { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_is_resolved() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(temp.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.txt"), root.join("link.txt")).unwrap();

        let entries: Vec<_> = enumerate(&[Source::new(&root)]).map(|c| c.unwrap()).collect();
        assert_eq!(entries[1].archive_name, "tree/link.txt");
        assert_eq!(entries[1].size, 4);
    }
}
