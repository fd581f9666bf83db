//! Archive path normalization and destination safety.
//!
//! Names are normalized once, when an entry is created: forward slashes, no
//! leading slash, case preserved, directories with a trailing `/`. On
//! extraction every name is re-validated before it touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ZipError};

/// Join normalized components into an archive name.
pub fn archive_name<'a>(
    components: impl IntoIterator<Item = &'a str>,
    is_directory: bool,
) -> String {
    let mut name = components
        .into_iter()
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/");
    if is_directory && !name.is_empty() {
        name.push('/');
    }
    name
}

/// Archive-relative components of `path` below `root`, as UTF-8 strings.
pub fn relative_components(path: &Path, root: &Path) -> Result<Vec<String>> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .map(|s| {
            s.to_str().map(str::to_owned).ok_or_else(|| {
                ZipError::source_unreadable(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "path is not valid UTF-8"),
                )
            })
        })
        .collect()
}

/// Entry name validated as safe to materialize below a destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeEntryPath(PathBuf);

impl SafeEntryPath {
    /// Validate an entry name from an archive.
    ///
    /// Backslashes are treated as separators. Empty and `.` segments are
    /// dropped. `..` segments, absolute names, drive prefixes and NUL bytes
    /// are rejected with [`ZipError::PathTraversalRejected`].
    pub fn validate(name: &str) -> Result<Self> {
        let rejected = || ZipError::PathTraversalRejected {
            path: name.to_string(),
        };

        if name.contains('\0') {
            return Err(rejected());
        }
        let unified = name.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(rejected());
        }

        let mut out = PathBuf::new();
        for (i, segment) in unified.split('/').enumerate() {
            match segment {
                "" | "." => {}
                ".." => return Err(rejected()),
                s if i == 0 && s.len() >= 2 && s.as_bytes()[1] == b':' => return Err(rejected()),
                s => {
                    // A segment std parses as anything other than a single
                    // normal component (e.g. a Windows prefix) is refused.
                    let mut comps = Path::new(s).components();
                    match (comps.next(), comps.next()) {
                        (Some(Component::Normal(_)), None) => out.push(s),
                        _ => return Err(rejected()),
                    }
                }
            }
        }
        Ok(Self(out))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// `true` for names with no segments left, such as `./`.
    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// Resolve below `root`, refusing symlinked ancestors that leave it.
    ///
    /// The target, or its deepest existing ancestor, is canonicalized and
    /// must stay under the canonical root.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        let target = root.join(&self.0);
        let canonical_root = root
            .canonicalize()
            .map_err(|e| ZipError::unwritable(root, e))?;

        let mut ancestor = Some(target.as_path());
        while let Some(dir) = ancestor {
            match dir.canonicalize() {
                Ok(real) => {
                    if !real.starts_with(&canonical_root) {
                        return Err(ZipError::PathTraversalRejected {
                            path: self.0.to_string_lossy().into_owned(),
                        });
                    }
                    break;
                }
                Err(_) => ancestor = dir.parent(),
            }
        }
        Ok(target)
    }
}
