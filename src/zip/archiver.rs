//! Zip engine: drives enumeration and the writer, reporting progress.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};

use super::enumerate::{Source, enumerate_except, measure_except};
use super::writer::{FileOptions, ZipWriter};
use crate::config::ZipOptions;
use crate::error::{Result, ZipError};
use crate::event::{EventSink, ProgressTracker, ZipEvent};

/// An in-memory file to place in an archive.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    /// Archive-relative path, `/`-separated.
    pub name: String,
    pub data: Vec<u8>,
    pub modified: SystemTime,
}

impl ArchiveFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            modified: SystemTime::now(),
        }
    }
}

/// Zip filesystem `sources` into `out`.
///
/// A sizing pass over the inputs fixes the progress denominator before
/// the first event. Entries are written in enumeration order.
pub fn zip_sources<W, S>(
    sources: &[Source],
    out: W,
    options: &ZipOptions,
    sink: &mut S,
) -> Result<W>
where
    W: Write,
    S: EventSink<ZipEvent>,
{
    zip_sources_to(sources, out, options, sink, None, Ok)
}

/// [`zip_sources`] for a file-backed archive.
///
/// The file at the canonical path `skip` is left out of the inputs, and
/// `commit` runs on the finished container before `Finished` is emitted.
pub(crate) fn zip_sources_to<W, S, C>(
    sources: &[Source],
    out: W,
    options: &ZipOptions,
    sink: &mut S,
    skip: Option<&Path>,
    commit: C,
) -> Result<W>
where
    W: Write,
    S: EventSink<ZipEvent>,
    C: FnOnce(W) -> Result<W>,
{
    let sizing = measure_except(sources, skip)?;
    debug!(
        sources = sources.len(),
        entries = sizing.entries,
        bytes = sizing.total_bytes,
        "zipping"
    );

    let mut tracker = ProgressTracker::new(sizing.total_bytes, sizing.entries);
    let mut writer = ZipWriter::new(out);

    for candidate in enumerate_except(sources, skip) {
        check_canceled(sink)?;
        let candidate = candidate?;

        let written = if candidate.is_directory {
            writer.add_directory(&candidate.archive_name, candidate.modified, candidate.mode)?;
            0
        } else {
            let mut file = File::open(&candidate.source)
                .map_err(|e| ZipError::source_unreadable(&candidate.source, e))?;
            let file_options = FileOptions {
                modified: candidate.modified,
                mode: candidate.mode,
                compression: options.compression,
                password: options.password.as_ref(),
                source_path: Some(&candidate.source),
            };
            writer.add_file(&candidate.archive_name, &mut file, &file_options)?
        };
        sink.emit(tracker.entry_done(written).into());
    }

    finish(writer, tracker, sink, commit)
}

/// Zip in-memory files into `out`, in slice order.
pub fn zip_archive_files<W, S>(
    files: &[ArchiveFile],
    out: W,
    options: &ZipOptions,
    sink: &mut S,
) -> Result<W>
where
    W: Write,
    S: EventSink<ZipEvent>,
{
    zip_archive_files_to(files, out, options, sink, Ok)
}

/// [`zip_archive_files`], running `commit` before `Finished` is emitted.
pub(crate) fn zip_archive_files_to<W, S, C>(
    files: &[ArchiveFile],
    out: W,
    options: &ZipOptions,
    sink: &mut S,
    commit: C,
) -> Result<W>
where
    W: Write,
    S: EventSink<ZipEvent>,
    C: FnOnce(W) -> Result<W>,
{
    let total: u64 = files.iter().map(|f| f.data.len() as u64).sum();
    debug!(entries = files.len(), bytes = total, "zipping in-memory files");

    let mut tracker = ProgressTracker::new(total, files.len());
    let mut writer = ZipWriter::new(out);

    for file in files {
        check_canceled(sink)?;
        let source = PathBuf::from(&file.name);
        let file_options = FileOptions {
            modified: file.modified,
            mode: 0o644,
            compression: options.compression,
            password: options.password.as_ref(),
            source_path: Some(&source),
        };
        let written = writer.add_file(&file.name, &mut Cursor::new(&file.data), &file_options)?;
        sink.emit(tracker.entry_done(written).into());
    }

    finish(writer, tracker, sink, commit)
}

/// Write the Central Directory and commit the container. `Finished` is
/// only emitted once the archive is durable.
fn finish<W, S, C>(
    writer: ZipWriter<W>,
    mut tracker: ProgressTracker,
    sink: &mut S,
    commit: C,
) -> Result<W>
where
    W: Write,
    S: EventSink<ZipEvent>,
    C: FnOnce(W) -> Result<W>,
{
    check_canceled(sink)?;
    let entries = writer.entries().len();
    let out = commit(writer.finish()?)?;
    if !tracker.is_complete() {
        sink.emit(tracker.complete().into());
    }
    debug!(entries, "archive finished");
    sink.emit(ZipEvent::Finished);
    Ok(out)
}

pub(crate) fn check_canceled<E, S: EventSink<E>>(sink: &S) -> Result<()> {
    if sink.is_canceled() {
        trace!("operation canceled");
        return Err(ZipError::OperationCanceled);
    }
    Ok(())
}
