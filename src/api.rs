//! Operation entry points: blocking, async and streaming.
//!
//! Every form runs the same engine. The async and streaming forms move it
//! onto Tokio's blocking pool and forward events back in emission order.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{UnzipOptions, ZipOptions};
use crate::error::{Result, ZipError};
use crate::event::{CancelToken, EventSink, NoopSink, UnzipEvent, ZipEvent};
use crate::io::LocalFileReader;
use crate::zip::archiver::{zip_archive_files_to, zip_sources_to};
use crate::zip::{ArchiveFile, Source, ZipExtractor};

/// Events buffered between the worker and a stream consumer.
const STREAM_BUFFER: usize = 64;

/// Zip `sources` into the archive at `destination`.
///
/// # Examples
///
/// ```no_run
/// use rezip::{Source, ZipOptions, zip_files};
///
/// let sources = [Source::new("a.txt"), Source::new("sub")];
/// zip_files(&sources, "out.zip", &ZipOptions::default())?;
/// # Ok::<(), rezip::ZipError>(())
/// ```
pub fn zip_files(
    sources: &[Source],
    destination: impl AsRef<Path>,
    options: &ZipOptions,
) -> Result<()> {
    zip_files_with_events(sources, destination, options, &mut NoopSink)
}

/// [`zip_files`], reporting each progress fraction.
pub fn zip_files_with_progress(
    sources: &[Source],
    destination: impl AsRef<Path>,
    options: &ZipOptions,
    mut on_progress: impl FnMut(f64),
) -> Result<()> {
    zip_files_with_events(sources, destination, options, &mut |event: ZipEvent| {
        if let ZipEvent::Progress(p) = event {
            on_progress(p);
        }
    })
}

/// [`zip_files`], delivering every event to `sink`.
///
/// The archive is never added to itself when it lands inside a source
/// directory. `Finished` is emitted once the file is synced to disk, and a
/// partially written archive is removed when the operation fails.
pub fn zip_files_with_events<S: EventSink<ZipEvent>>(
    sources: &[Source],
    destination: impl AsRef<Path>,
    options: &ZipOptions,
    sink: &mut S,
) -> Result<()> {
    let destination = destination.as_ref();
    write_archive(destination, |out, own_path| {
        let commit = |out| commit_archive(out, destination);
        zip_sources_to(sources, out, options, sink, Some(own_path), commit)
    })
}

/// Zip in-memory files into the archive at `destination`.
pub fn zip_data(
    files: &[ArchiveFile],
    destination: impl AsRef<Path>,
    options: &ZipOptions,
) -> Result<()> {
    let destination = destination.as_ref();
    write_archive(destination, |out, _| {
        let commit = |out| commit_archive(out, destination);
        zip_archive_files_to(files, out, options, &mut NoopSink, commit)
    })
}

/// Create `destination` and run `run` on it with the file's canonical path,
/// removing the file again when `run` fails.
fn write_archive<F>(destination: &Path, run: F) -> Result<()>
where
    F: FnOnce(BufWriter<File>, &Path) -> Result<BufWriter<File>>,
{
    let file = File::create(destination).map_err(|e| ZipError::unwritable(destination, e))?;
    let result = fs::canonicalize(destination)
        .map_err(|e| ZipError::unwritable(destination, e))
        .and_then(|own_path| run(BufWriter::new(file), &own_path));

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            if let Err(e) = fs::remove_file(destination) {
                warn!(path = %destination.display(), error = %e, "cannot remove partial archive");
            }
            Err(match err {
                ZipError::Io(e) => ZipError::unwritable(destination, e),
                other => other,
            })
        }
    }
}

/// Flush buffered bytes and sync the archive file to disk.
fn commit_archive(mut out: BufWriter<File>, destination: &Path) -> Result<BufWriter<File>> {
    out.flush()
        .and_then(|()| out.get_ref().sync_all())
        .map_err(|e| ZipError::unwritable(destination, e))?;
    Ok(out)
}

/// Extract the archive at `source` into the `destination` directory.
///
/// The directory is created when missing.
///
/// # Examples
///
/// ```no_run
/// use rezip::{UnzipOptions, unzip_file};
///
/// unzip_file("out.zip", "extracted", &UnzipOptions::default().with_overwrite(true))?;
/// # Ok::<(), rezip::ZipError>(())
/// ```
pub fn unzip_file(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    options: &UnzipOptions,
) -> Result<()> {
    unzip_file_with_events(source, destination, options, &mut NoopSink)
}

/// [`unzip_file`], reporting progress fractions and every written path.
pub fn unzip_file_with_handlers(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    options: &UnzipOptions,
    mut on_progress: impl FnMut(f64),
    mut on_file: impl FnMut(&Path),
) -> Result<()> {
    unzip_file_with_events(source, destination, options, &mut |event: UnzipEvent| match event {
        UnzipEvent::Progress(p) => on_progress(p),
        UnzipEvent::FileOutput(path) => on_file(&path),
        UnzipEvent::Finished => {}
    })
}

/// [`unzip_file`], delivering every event to `sink`.
pub fn unzip_file_with_events<S: EventSink<UnzipEvent>>(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    options: &UnzipOptions,
    sink: &mut S,
) -> Result<()> {
    let source = source.as_ref();
    let destination = destination.as_ref();
    if !options.accepts(source) {
        return Err(ZipError::UnsupportedFileExtension {
            path: source.to_path_buf(),
        });
    }

    let reader = LocalFileReader::new(source)?;
    ZipExtractor::new(Arc::new(reader))
        .extract_to(destination, options, sink)
        .map_err(|err| match err {
            ZipError::Io(e) => ZipError::source_unreadable(source, e),
            other => other,
        })
}

/// Async [`zip_files`]: runs on the blocking pool, calling `on_progress`
/// on the awaiting task in emission order.
///
/// Dropping the future cancels the operation before its next entry.
pub async fn zip_files_async(
    sources: Vec<Source>,
    destination: PathBuf,
    options: ZipOptions,
    mut on_progress: impl FnMut(f64),
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::task::spawn_blocking(move || {
        zip_files_with_events(&sources, &destination, &options, &mut ChannelSink { tx })
    });

    while let Some(event) = rx.recv().await {
        if let ZipEvent::Progress(p) = event {
            on_progress(p);
        }
    }
    task.await.map_err(|e| ZipError::Worker(e.to_string()))?
}

/// Async [`unzip_file`]: runs on the blocking pool, calling the handlers
/// on the awaiting task in emission order.
///
/// Dropping the future cancels the operation before its next entry.
pub async fn unzip_file_async(
    source: PathBuf,
    destination: PathBuf,
    options: UnzipOptions,
    mut on_progress: impl FnMut(f64),
    mut on_file: impl FnMut(&Path),
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::task::spawn_blocking(move || {
        unzip_file_with_events(&source, &destination, &options, &mut ChannelSink { tx })
    });

    while let Some(event) = rx.recv().await {
        match event {
            UnzipEvent::Progress(p) => on_progress(p),
            UnzipEvent::FileOutput(path) => on_file(&path),
            UnzipEvent::Finished => {}
        }
    }
    task.await.map_err(|e| ZipError::Worker(e.to_string()))?
}

/// Zip `sources` in the background, yielding events as a stream.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
pub fn zip_file_stream(
    sources: Vec<Source>,
    destination: PathBuf,
    options: ZipOptions,
) -> EventStream<ZipEvent> {
    EventStream::spawn(move |sink| zip_files_with_events(&sources, &destination, &options, sink))
}

/// Extract `source` in the background, yielding events as a stream.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
pub fn unzip_file_stream(
    source: PathBuf,
    destination: PathBuf,
    options: UnzipOptions,
) -> EventStream<UnzipEvent> {
    EventStream::spawn(move |sink| unzip_file_with_events(&source, &destination, &options, sink))
}

/// Cancellable stream of operation events.
///
/// Yields `Ok` events ending with `Finished`, or ends with one `Err`.
/// Dropping the stream cancels the operation before its next entry.
pub struct EventStream<E> {
    rx: mpsc::Receiver<Result<E>>,
    token: CancelToken,
}

impl<E: Send + 'static> EventStream<E> {
    fn spawn<F>(run: F) -> Self
    where
        F: FnOnce(&mut StreamSink<E>) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let token = CancelToken::new();
        let mut sink = StreamSink {
            tx,
            token: token.clone(),
        };

        tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| run(&mut sink)))
                .unwrap_or_else(|_| Err(ZipError::Worker("operation panicked".into())));
            if let Err(err) = result {
                debug!(error = %err, "stream operation failed");
                // The consumer may already be gone
                let _ = sink.tx.blocking_send(Err(err));
            }
        });

        Self { rx, token }
    }
}

impl<E> EventStream<E> {
    /// Ask the operation to stop before its next entry.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl<E> Stream for EventStream<E> {
    type Item = Result<E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<E> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct StreamSink<E> {
    tx: mpsc::Sender<Result<E>>,
    token: CancelToken,
}

impl<E> EventSink<E> for StreamSink<E> {
    fn emit(&mut self, event: E) {
        if self.tx.blocking_send(Ok(event)).is_err() {
            self.token.cancel();
        }
    }

    fn is_canceled(&self) -> bool {
        self.token.is_canceled() || self.tx.is_closed()
    }
}

struct ChannelSink<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> EventSink<E> for ChannelSink<E> {
    fn emit(&mut self, event: E) {
        // A closed channel means the awaiting future was dropped;
        // is_canceled stops the engine at the next entry.
        let _ = self.tx.send(event);
    }

    fn is_canceled(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn extension_gate_rejects_before_opening() {
        let temp = TempDir::new().unwrap();
        let err = unzip_file(temp.path().join("notes.txt"), temp.path(), &UnzipOptions::default())
            .unwrap_err();
        assert!(matches!(err, ZipError::UnsupportedFileExtension { .. }));
    }

    #[test]
    fn failed_zip_removes_partial_archive() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out.zip");
        let sources = [Source::new(temp.path().join("missing"))];
        let err = zip_files(&sources, &out, &ZipOptions::default()).unwrap_err();
        assert!(matches!(err, ZipError::SourceUnreadable { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn missing_destination_parent_is_unwritable() {
        let temp = TempDir::new().unwrap();
        let err = zip_data(&[], temp.path().join("no/such/dir/out.zip"), &ZipOptions::default())
            .unwrap_err();
        assert!(matches!(err, ZipError::DestinationUnwritable { .. }));
    }

    #[test]
    fn archive_inside_source_is_not_added() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        let archive = src.join("out.zip");

        let mut events = Vec::new();
        let mut sink = |e: ZipEvent| events.push(e);
        zip_files_with_events(&[Source::new(&src)], &archive, &ZipOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(events.last(), Some(&ZipEvent::Finished));

        let reader = LocalFileReader::new(&archive).unwrap();
        let entries = ZipExtractor::new(Arc::new(reader)).list_files().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["src/", "src/a.txt"]);
    }
}
