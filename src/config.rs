//! Options for zip and unzip operations.
//!
//! Defaults are explicit values, never shared mutable state: default
//! compression, no password, no overwriting.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Per-archive compression policy.
///
/// Applied to every regular file. Directories are always stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store entries without compression.
    NoCompression,
    /// DEFLATE level 1.
    Fastest,
    /// DEFLATE level 6.
    #[default]
    Default,
    /// DEFLATE level 9.
    Best,
}

impl CompressionLevel {
    /// Numeric DEFLATE level, or `None` when entries are stored.
    pub fn deflate_level(self) -> Option<u32> {
        match self {
            Self::NoCompression => None,
            Self::Fastest => Some(1),
            Self::Default => Some(6),
            Self::Best => Some(9),
        }
    }
}

/// A password supplied to a single operation.
///
/// The buffer is overwritten when the value is dropped and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Vec<u8>);

impl Password {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.fill(0);
        // keeps the wipe from being optimized out
        std::hint::black_box(&self.0);
    }
}

/// Options for creating an archive.
///
/// # Examples
///
/// ```
/// use rezip::{CompressionLevel, ZipOptions};
///
/// let options = ZipOptions::default()
///     .with_compression(CompressionLevel::Best)
///     .with_password("hunter2");
/// assert_eq!(options.compression, CompressionLevel::Best);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ZipOptions {
    /// Compression policy applied to regular files.
    ///
    /// Default: [`CompressionLevel::Default`].
    pub compression: CompressionLevel,

    /// Encrypt every regular file with ZipCrypto when set.
    ///
    /// Default: `None`.
    pub password: Option<Password>,
}

impl ZipOptions {
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionLevel) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }
}

const DEFAULT_EXTENSIONS: [&str; 2] = ["zip", "cbz"];

/// Options for extracting an archive.
///
/// # Examples
///
/// ```
/// use rezip::UnzipOptions;
///
/// let options = UnzipOptions::default()
///     .with_overwrite(true)
///     .with_file_extension("epub");
/// assert!(options.accepts(std::path::Path::new("book.EPUB")));
/// assert!(!options.accepts(std::path::Path::new("notes.txt")));
/// ```
#[derive(Debug, Clone)]
pub struct UnzipOptions {
    /// Replace existing destination files.
    ///
    /// When `false`, entries whose destination file already exists are
    /// skipped without error. Directories are always created or reused.
    ///
    /// Default: `false`.
    pub overwrite: bool,

    /// Password for encrypted entries.
    ///
    /// Default: `None`.
    pub password: Option<Password>,

    /// Restore Unix permission bits stored in the archive.
    ///
    /// Default: `true`. Ignored on non-Unix hosts.
    pub preserve_permissions: bool,

    /// Restore entry modification times.
    ///
    /// Default: `true`.
    pub preserve_modified: bool,

    /// Lower-cased file extensions accepted for the source archive.
    /// `None` accepts any path.
    ///
    /// Default: `zip` and `cbz`.
    pub file_extensions: Option<BTreeSet<String>>,
}

impl Default for UnzipOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            password: None,
            preserve_permissions: true,
            preserve_modified: true,
            file_extensions: Some(DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect()),
        }
    }
}

impl UnzipOptions {
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    #[must_use]
    pub fn with_preserve_modified(mut self, preserve: bool) -> Self {
        self.preserve_modified = preserve;
        self
    }

    /// Accept source archives with this extension in addition to the
    /// defaults.
    #[must_use]
    pub fn with_file_extension(mut self, ext: &str) -> Self {
        self.file_extensions
            .get_or_insert_with(BTreeSet::new)
            .insert(ext.trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Accept source archives regardless of extension.
    #[must_use]
    pub fn any_extension(mut self) -> Self {
        self.file_extensions = None;
        self
    }

    /// Whether `path` passes the file-extension gate.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(allowed) = &self.file_extensions else {
            return true;
        };
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| allowed.contains(&e.to_ascii_lowercase()))
    }
}
