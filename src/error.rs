//! Error types for archive creation and extraction.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`ZipError`].
pub type Result<T> = std::result::Result<T, ZipError>;

/// Errors that can occur while zipping or unzipping.
///
/// Every operation either finishes or fails with exactly one of these.
#[derive(Error, Debug)]
pub enum ZipError {
    /// Structural records are malformed (bad signature, truncated data,
    /// declared sizes past the end of the container).
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// The entry uses a compression method other than store or deflate.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompressionMethod(u16),

    /// CRC-32 of the decoded bytes does not match the stored value.
    #[error("checksum mismatch for {name}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Entry name.
        name: String,
        /// CRC-32 recorded in the archive.
        expected: u32,
        /// CRC-32 computed over the decoded data.
        actual: u32,
    },

    /// The DEFLATE stream of an unencrypted entry could not be decoded.
    #[error("failed to decompress {name}: {reason}")]
    Decompression {
        /// Entry name.
        name: String,
        /// Codec message.
        reason: String,
    },

    /// Decryption or post-decryption verification failed.
    #[error("wrong password or corrupt data for {name}")]
    WrongPasswordOrCorruptData {
        /// Entry name.
        name: String,
    },

    /// The entry is encrypted but no password was supplied.
    #[error("password required for encrypted entry {name}")]
    PasswordRequired {
        /// Entry name.
        name: String,
    },

    /// An entry name would resolve outside the destination root.
    #[error("path traversal rejected: {path}")]
    PathTraversalRejected {
        /// The offending entry name.
        path: String,
    },

    /// An input could not be enumerated or read.
    #[error("cannot read {path}: {source}")]
    SourceUnreadable {
        /// The input path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A destination file or directory could not be created or written.
    #[error("cannot write {path}: {source}")]
    DestinationUnwritable {
        /// The destination path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Symbolic links form a loop below an input directory.
    #[error("symlink cycle detected at {path}")]
    SymlinkCycle {
        /// Path at which the loop was detected.
        path: PathBuf,
    },

    /// Two inputs map to the same archive-relative path.
    #[error("duplicate archive entry: {name}")]
    DuplicateEntry {
        /// The repeated archive path.
        name: String,
    },

    /// Entry size, offset or count exceeds the classic (non-ZIP64) limits.
    #[error("{name} is too large for a ZIP archive ({size} bytes)")]
    EntryTooLarge {
        /// Entry name, or the archive path for offset overflow.
        name: String,
        /// The offending size or offset.
        size: u64,
    },

    /// The source archive does not carry an accepted file extension.
    #[error("unsupported file extension: {path}")]
    UnsupportedFileExtension {
        /// The source archive path.
        path: PathBuf,
    },

    /// The consumer cancelled the operation.
    #[error("operation canceled")]
    OperationCanceled,

    /// The background worker panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),

    /// I/O on the archive container itself failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZipError {
    /// Returns `true` if the error comes from a password problem.
    ///
    /// # Examples
    ///
    /// ```
    /// use rezip::ZipError;
    ///
    /// let err = ZipError::PasswordRequired { name: "a.txt".into() };
    /// assert!(err.is_password_error());
    /// assert!(!ZipError::OperationCanceled.is_password_error());
    /// ```
    pub fn is_password_error(&self) -> bool {
        matches!(
            self,
            Self::WrongPasswordOrCorruptData { .. } | Self::PasswordRequired { .. }
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArchive(msg.into())
    }

    pub(crate) fn source_unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = ZipError::ChecksumMismatch {
            name: "a.txt".into(),
            expected: 0xdead_beef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch for a.txt: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: ZipError = std::io::Error::other("boom").into();
        assert!(matches!(err, ZipError::Io(_)));
        assert!(!err.is_password_error());
    }
}
