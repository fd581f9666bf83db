//! # rezip
//!
//! ZIP archive creation and extraction with optional ZipCrypto passwords,
//! progress events and async/streaming front ends.
//!
//! The engine is synchronous. [`zip_files`] and [`unzip_file`] run it on
//! the calling thread; the `_async` and `_stream` variants run it on
//! Tokio's blocking pool and hand events back in order.
//!
//! ## Features
//!
//! - Zip files and directory trees, or in-memory data ([`zip_data`])
//! - STORED and DEFLATE entries, with a per-archive [`CompressionLevel`]
//! - Password protection (traditional PKWARE encryption)
//! - Path-traversal checks on every extracted entry
//! - ZIP64 reading, Unix permissions and modification times
//! - Cancellable event streams
//!
//! ## Example
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use rezip::{Source, UnzipEvent, UnzipOptions, ZipOptions, unzip_file_stream, zip_files};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     zip_files(&[Source::new("docs")], "docs.zip", &ZipOptions::default())?;
//!
//!     let options = UnzipOptions::default();
//!     let mut events = unzip_file_stream("docs.zip".into(), "out".into(), options);
//!     while let Some(event) = events.next().await {
//!         match event? {
//!             UnzipEvent::Progress(p) => println!("{:.0}%", p * 100.0),
//!             UnzipEvent::FileOutput(path) => println!("{}", path.display()),
//!             UnzipEvent::Finished => println!("done"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod io;
pub mod zip;

pub use api::{
    EventStream, unzip_file, unzip_file_async, unzip_file_stream, unzip_file_with_events,
    unzip_file_with_handlers, zip_data, zip_file_stream, zip_files, zip_files_async,
    zip_files_with_events, zip_files_with_progress,
};
pub use config::{CompressionLevel, Password, UnzipOptions, ZipOptions};
pub use error::{Result, ZipError};
pub use event::{CancelToken, Cancelable, EventSink, NoopSink, UnzipEvent, ZipEvent};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use zip::{ArchiveFile, CompressionMethod, Source, ZipExtractor, ZipFileEntry, ZipWriter};
