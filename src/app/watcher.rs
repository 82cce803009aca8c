// Mlog - app/watcher.rs
//
// Incremental file watcher: tracks a byte offset per registered log file,
// reads only the bytes appended since the last read, and drives
// classifier -> parser -> event sink for every complete new line.
//
// Architecture:
//   - `Watcher` is owned by the host. `add_path` registers files (and may be
//     called before or after `start`); `start` creates one
//     `notify::RecommendedWatcher` and spawns a single processing thread.
//   - The OS watcher subscribes to each registered file's parent directory
//     (non-recursive). Events for unregistered files in the same directory
//     are ignored by the map lookup. Watching the directory rather than the
//     file keeps the subscription valid across rename-style rotation.
//   - The processing thread handles notifications strictly one at a time, in
//     arrival order. A slow parse or a slow sink delays every other path.
//   - `stop` sets an `Arc<AtomicBool>` cancel flag, drops the OS watcher and
//     joins the thread. Once it returns, no further line reaches a parser.
//   - Outcomes are sent as `WatchProgress` messages over a bounded channel
//     that the host drains with `poll_progress`. A full channel drops
//     messages rather than stalling ingestion.
//
// Offset rules:
//   - Baseline at registration = current file size. Content that exists
//     before `add_path` is never ingested.
//   - Current size < stored offset means truncation or rotation: the offset
//     and the partial-line buffer are reset to 0 before reading. Any buffered
//     partial line is reported as `PartialLineDiscarded`. A replacement that
//     is not shorter than the stored offset looks like an append and is read
//     from the old offset.
//   - Read failures leave the offset untouched; the same range is retried on
//     the next notification. Nothing is parsed from a failed read.
//   - The offset advances by exactly the number of bytes read. Bytes after
//     the last newline are kept as a partial line and completed later.
//
// Known gap: when the OS notification queue overflows, events are lost and
// nothing rescans. Lost appends are picked up on the file's next
// notification because reads always go to EOF.

use crate::core::classify::Classifier;
use crate::core::model::{DiscardReason, WatchProgress};
use crate::core::parser::ParserKind;
use crate::store::EventSink;
use crate::util::constants::{
    DEFAULT_PROGRESS_CHANNEL_CAPACITY, MAX_PARTIAL_LINE_BYTES, WATCH_CANCEL_CHECK_INTERVAL_MS,
};
use crate::util::error::WatchError;
use crate::util::logging::preview;
use chrono::Utc;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

// =============================================================================
// Per-file state
// =============================================================================

/// State kept for every registered file. Shared between `add_path` and the
/// processing thread through `Pipeline::files`.
#[derive(Debug)]
struct WatchedFile {
    /// Last byte position consumed.
    offset: u64,
    /// Parser resolved once at registration. None = lines are ignored.
    kind: Option<ParserKind>,
    /// Bytes after the last newline seen so far (an in-progress line).
    partial: Vec<u8>,
}

/// Result of one successful incremental read.
struct ReadBatch {
    kind: Option<ParserKind>,
    lines: Vec<String>,
    bytes_read: u64,
    rotated: Option<(u64, u64)>,
    /// Partial-line bytes dropped during this read.
    discarded: Vec<(usize, DiscardReason)>,
}

// =============================================================================
// Pipeline (shared by the host handle and the processing thread)
// =============================================================================

#[derive(Clone)]
struct Pipeline {
    server_id: Arc<str>,
    sink: Arc<dyn EventSink>,
    files: Arc<Mutex<HashMap<PathBuf, WatchedFile>>>,
    progress_tx: mpsc::SyncSender<WatchProgress>,
}

impl Pipeline {
    fn lock_files(&self) -> MutexGuard<'_, HashMap<PathBuf, WatchedFile>> {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, msg: WatchProgress) {
        if let Err(mpsc::TrySendError::Full(dropped)) = self.progress_tx.try_send(msg) {
            tracing::trace!(progress = ?dropped, "Progress channel full, message dropped");
        }
    }

    /// Handle one change notification for `path`.
    ///
    /// The file map is locked only for the read step; parsing and storing run
    /// after the lock is released so `add_path` is never blocked on the sink.
    fn ingest(&self, path: &Path) {
        let (key, result) = {
            let mut files = self.lock_files();
            let key = if files.contains_key(path) {
                path.to_path_buf()
            } else {
                let key = watch_key(path);
                if !files.contains_key(&key) {
                    return;
                }
                key
            };
            let result = match files.get_mut(&key) {
                Some(file) => read_appended(&key, file),
                None => return,
            };
            (key, result)
        };

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    tracing::debug!(path = %key.display(), "Watched file is gone, waiting for it to reappear");
                } else {
                    tracing::warn!(path = %key.display(), error = %e, "Read failed, offset unchanged");
                }
                self.report(WatchProgress::ReadFailed {
                    path: key,
                    message: e.to_string(),
                });
                return;
            }
        };

        if let Some((previous_offset, new_size)) = batch.rotated {
            tracing::info!(
                path = %key.display(),
                previous_offset,
                new_size,
                "File truncated or rotated, offset reset to 0"
            );
            self.report(WatchProgress::Rotated {
                path: key.clone(),
                previous_offset,
                new_size,
            });
        }

        for &(bytes, reason) in &batch.discarded {
            tracing::warn!(
                path = %key.display(),
                bytes,
                reason = %reason,
                "Unterminated partial line discarded"
            );
            self.report(WatchProgress::PartialLineDiscarded {
                path: key.clone(),
                bytes,
                reason,
            });
        }

        if batch.bytes_read == 0 {
            return;
        }

        let events = match batch.kind {
            Some(kind) => self.parse_and_store(&key, kind, &batch.lines),
            None => 0,
        };

        tracing::debug!(
            path = %key.display(),
            bytes = batch.bytes_read,
            lines = batch.lines.len(),
            events,
            "Ingested appended lines"
        );
        self.report(WatchProgress::Ingested {
            path: key,
            lines: batch.lines.len(),
            events,
        });
    }

    /// Parse each line and hand every resulting event to the sink.
    /// Returns the number of events stored.
    fn parse_and_store(&self, path: &Path, kind: ParserKind, lines: &[String]) -> usize {
        // One ingestion instant per batch.
        let timestamp = Utc::now();
        let mut stored = 0;

        for line in lines {
            let Some(event) = kind.parse(line, timestamp, &self.server_id) else {
                tracing::trace!(parser = %kind, line = preview(line), "No pattern matched");
                continue;
            };
            match self.sink.insert_event(&event) {
                Ok(id) => {
                    stored += 1;
                    tracing::trace!(id, event_type = %event.event_type, "Event stored");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        event_type = %event.event_type,
                        error = %e,
                        "Failed to store event, discarded"
                    );
                    self.report(WatchProgress::StoreFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }
        stored
    }
}

// =============================================================================
// Watcher
// =============================================================================

struct Running {
    os_watcher: RecommendedWatcher,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Incremental multi-file watcher. See the module header for the contract.
pub struct Watcher {
    pipeline: Pipeline,
    classifier: Classifier,
    progress_rx: mpsc::Receiver<WatchProgress>,
    /// Parent directories of registered files (the OS subscriptions).
    dirs: BTreeSet<PathBuf>,
    running: Option<Running>,
}

impl Watcher {
    pub fn new(server_id: &str, classifier: Classifier, sink: Arc<dyn EventSink>) -> Self {
        Self::with_progress_capacity(server_id, classifier, sink, DEFAULT_PROGRESS_CHANNEL_CAPACITY)
    }

    pub fn with_progress_capacity(
        server_id: &str,
        classifier: Classifier,
        sink: Arc<dyn EventSink>,
        capacity: usize,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::sync_channel(capacity.max(1));
        Self {
            pipeline: Pipeline {
                server_id: Arc::from(server_id),
                sink,
                files: Arc::new(Mutex::new(HashMap::new())),
                progress_tx,
            },
            classifier,
            progress_rx,
            dirs: BTreeSet::new(),
            running: None,
        }
    }

    /// Register every path in `paths`. A failure affects only its own path:
    /// it is logged and returned, and the remaining paths are still registered.
    pub fn add_paths<'a, I>(&mut self, paths: I) -> Vec<(PathBuf, WatchError)>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut failures = Vec::new();
        for path in paths {
            if let Err(e) = self.add_path(path) {
                tracing::warn!(path = %path.display(), error = %e, "Cannot watch path, skipping");
                failures.push((path.to_path_buf(), e));
            }
        }
        failures
    }

    /// Register a file for incremental reading.
    ///
    /// - Nonexistent path: logged, nothing registered, `Ok(())`.
    /// - Directory: `WatchError::NotAFile`.
    /// - Other stat failure: `WatchError::Stat`.
    ///
    /// The baseline offset is the current file size. Registering a path twice
    /// keeps the existing offset. If the watcher is already running, the
    /// file's directory is subscribed immediately.
    pub fn add_path(&mut self, path: &Path) -> Result<(), WatchError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Watch path does not exist, skipping");
                return Ok(());
            }
            Err(source) => {
                return Err(WatchError::Stat {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if metadata.is_dir() {
            return Err(WatchError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let key = watch_key(path);
        if self.pipeline.lock_files().contains_key(&key) {
            tracing::debug!(path = %key.display(), "Path already registered");
            return Ok(());
        }

        let kind = self
            .classifier
            .classify(path)
            .or_else(|| self.classifier.classify(&key));

        if let Some(dir) = key.parent().map(Path::to_path_buf) {
            if !self.dirs.contains(&dir) {
                if let Some(running) = self.running.as_mut() {
                    running
                        .os_watcher
                        .watch(&dir, RecursiveMode::NonRecursive)
                        .map_err(|source| WatchError::Notify { source })?;
                }
                self.dirs.insert(dir);
            }
        }

        let offset = metadata.len();
        self.pipeline.lock_files().insert(
            key.clone(),
            WatchedFile {
                offset,
                kind,
                partial: Vec::new(),
            },
        );

        match kind {
            Some(kind) => tracing::info!(path = %key.display(), parser = %kind, offset, "Watching file"),
            None => tracing::info!(
                path = %key.display(),
                offset,
                "Watching file with no matching parser; its lines will be ignored"
            ),
        }
        Ok(())
    }

    /// Subscribe to change notifications and launch the processing thread.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.running.is_some() {
            return Err(WatchError::AlreadyStarted);
        }

        let (event_tx, event_rx) = mpsc::channel();
        let mut os_watcher =
            notify::recommended_watcher(event_tx).map_err(|source| WatchError::Notify { source })?;

        for dir in &self.dirs {
            if let Err(e) = os_watcher.watch(dir, RecursiveMode::NonRecursive) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to subscribe to directory");
                self.pipeline.report(WatchProgress::SubscribeFailed {
                    path: dir.clone(),
                    message: e.to_string(),
                });
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let pipeline = self.pipeline.clone();
        let handle = std::thread::spawn(move || {
            run_processing_loop(pipeline, event_rx, thread_cancel);
        });

        let file_count = self.pipeline.lock_files().len();
        self.pipeline.report(WatchProgress::Started { file_count });
        tracing::info!(files = file_count, dirs = self.dirs.len(), "Watcher started");

        self.running = Some(Running {
            os_watcher,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Stop the processing thread and release OS subscriptions.
    ///
    /// Blocks until the thread has exited, at most one notification's worth
    /// of processing plus `WATCH_CANCEL_CHECK_INTERVAL_MS`. A no-op if the
    /// watcher is not running.
    pub fn stop(&mut self) -> Result<(), WatchError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel.store(true, Ordering::SeqCst);
        // Dropping the OS watcher closes the notification channel.
        drop(running.os_watcher);
        running
            .handle
            .join()
            .map_err(|_| WatchError::WorkerPanicked)?;
        tracing::info!("Watcher stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Drain at most `max` pending progress messages without blocking.
    pub fn poll_progress(&self, max: usize) -> Vec<WatchProgress> {
        let mut messages = Vec::with_capacity(max.min(8));
        while messages.len() < max {
            match self.progress_rx.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(_) => break,
            }
        }
        messages
    }

    /// Current stored offset for a registered path.
    pub fn offset_of(&self, path: &Path) -> Option<u64> {
        let files = self.pipeline.lock_files();
        files
            .get(path)
            .or_else(|| files.get(&watch_key(path)))
            .map(|f| f.offset)
    }

    /// Registered paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.pipeline.lock_files().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Watcher did not stop cleanly");
        }
    }
}

// =============================================================================
// Processing thread
// =============================================================================

fn run_processing_loop(
    pipeline: Pipeline,
    events: mpsc::Receiver<notify::Result<notify::Event>>,
    cancel: Arc<AtomicBool>,
) {
    let timeout = Duration::from_millis(WATCH_CANCEL_CHECK_INTERVAL_MS);

    'outer: while !cancel.load(Ordering::SeqCst) {
        match events.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                if !triggers_read(&event.kind) {
                    continue;
                }
                for path in &event.paths {
                    if cancel.load(Ordering::SeqCst) {
                        break 'outer;
                    }
                    pipeline.ingest(path);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Filesystem notification error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.report(WatchProgress::Stopped);
    tracing::debug!("Watcher processing loop exited");
}

/// Only content changes and (re)creation can add bytes.
fn triggers_read(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

// =============================================================================
// Incremental read
// =============================================================================

/// Read everything appended since `file.offset` and split off complete lines.
///
/// `file` is only updated after the read succeeded, so an error leaves the
/// offset (and partial buffer) exactly as they were.
fn read_appended(path: &Path, file: &mut WatchedFile) -> io::Result<ReadBatch> {
    let size = std::fs::metadata(path)?.len();

    let (start, rotated) = if size < file.offset {
        (0, Some((file.offset, size)))
    } else {
        (file.offset, None)
    };

    let mut buf = Vec::new();
    if size > start {
        let mut f = std::fs::File::open(path)?;
        f.seek(SeekFrom::Start(start))?;
        f.read_to_end(&mut buf)?;
    }

    let mut discarded = Vec::new();
    if rotated.is_some() && !file.partial.is_empty() {
        discarded.push((file.partial.len(), DiscardReason::Rotated));
        file.partial.clear();
    }
    file.offset = start + buf.len() as u64;
    file.partial.extend_from_slice(&buf);
    let lines = take_complete_lines(&mut file.partial);

    if file.partial.len() > MAX_PARTIAL_LINE_BYTES {
        discarded.push((file.partial.len(), DiscardReason::TooLong));
        file.partial.clear();
    }

    Ok(ReadBatch {
        kind: file.kind,
        lines,
        bytes_read: buf.len() as u64,
        rotated,
        discarded,
    })
}

/// Remove every complete (newline-terminated) line from `partial` and return
/// the non-blank ones, decoded as lossy UTF-8 with any trailing `\r` removed.
fn take_complete_lines(partial: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = partial.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let rest = partial.split_off(last_newline + 1);
    let complete = std::mem::replace(partial, rest);

    complete
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

/// Map key for a path: canonical parent directory joined with the file name.
///
/// Matches the paths notify reports for a watched directory, and keeps a
/// symlinked file's own name.
fn watch_key(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    parent
        .canonicalize()
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}
