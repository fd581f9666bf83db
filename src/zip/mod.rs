//! ZIP archive creation, parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP records (EOCD, headers) and their byte layout
//! - [`parser`]: reads the Central Directory from any [`ReadAt`](crate::io::ReadAt) source
//! - [`enumerate`]: deterministic walk of filesystem inputs
//! - [`writer`]: streams entries into an output container
//! - [`archiver`]: zip engine built on the enumerator and the writer
//! - [`extractor`]: unzip engine, in-memory reads and extraction to disk
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Archives are read from the end: EOCD first, then the Central Directory,
//! then each entry's Local File Header.
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE entries
//! - Traditional PKWARE (ZipCrypto) encryption
//! - ZIP64 records when reading
//! - Unix permissions and DOS modification times
//!
//! ## Limitations
//!
//! - The writer emits classic records only (4 GiB, 65534 entries)
//! - No AES encryption, no multi-disk archives
//! - No BZIP2, LZMA, or other compression methods

pub mod archiver;
pub mod enumerate;
pub mod extractor;
pub mod parser;
pub mod path;
pub mod structures;
pub mod writer;

pub use archiver::{ArchiveFile, zip_archive_files, zip_sources};
pub use enumerate::{Candidate, Sizing, Source, enumerate, measure};
pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use path::SafeEntryPath;
pub use structures::{CompressionMethod, ZipFileEntry};
pub use writer::{FileOptions, WriterState, ZipWriter};
