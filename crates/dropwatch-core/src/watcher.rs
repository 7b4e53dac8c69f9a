//! Directory watching for file discovery.
//!
//! This module provides cross-platform change notification using the
//! `notify` crate. It handles:
//! - An initial scan of the files already in the directory
//! - Create and modify events for files directly inside the directory
//! - Event debouncing, so a file being written is reported once it goes quiet
//! - Pattern-based file exclusion
//!
//! Subdirectories are not watched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::WatchConfig;
use crate::error::{Error, Result};

/// Watches one directory for files appearing or changing.
///
/// # Example
///
/// ```rust,ignore
/// let mut watcher = DirectoryWatcher::new(Path::new("/data/outgoing"), &WatchConfig::default())?;
/// for path in watcher.scan()? {
///     println!("already present: {}", path.display());
/// }
/// watcher.start()?;
/// while let Some(path) = watcher.next_path().await {
///     println!("appeared: {}", path.display());
/// }
/// ```
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<PathBuf>,
    directory: PathBuf,
    matcher: Arc<PatternMatcher>,
    debouncer: Debouncer,
}

impl DirectoryWatcher {
    /// Create a watcher for a directory.
    ///
    /// The directory is canonicalized so scanned and notified paths agree.
    /// The watcher is created but not started. Call `start()` to begin
    /// watching.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist or is not a directory
    /// - The exclusion patterns are invalid
    /// - The file system watcher cannot be created
    pub fn new(directory: &Path, config: &WatchConfig) -> Result<Self> {
        if !directory.is_dir() {
            return Err(Error::DirectoryNotFound(directory.display().to_string()));
        }
        let directory = std::fs::canonicalize(directory)?;

        let matcher = Arc::new(PatternMatcher::new(&config.exclude_patterns)?);
        let callback_matcher = Arc::clone(&matcher);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => handle_notify_event(&callback_matcher, &event, &event_tx),
            Err(e) => tracing::warn!("Watcher error: {}", e),
        })
        .map_err(|e| Error::WatcherError(e.to_string()))?;

        Ok(Self {
            watcher,
            event_rx,
            directory,
            matcher,
            debouncer: Debouncer::new(config.debounce),
        })
    }

    /// The watched directory (canonical form).
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// List the files currently in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        scan_with(&self.directory, &self.matcher)
    }

    /// Start watching the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot start watching the directory.
    pub fn start(&mut self) -> Result<()> {
        self.watcher
            .watch(&self.directory, RecursiveMode::NonRecursive)
            .map_err(|e| Error::WatcherError(e.to_string()))?;
        tracing::info!("Watching {}", self.directory.display());
        Ok(())
    }

    /// Stop watching the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot stop watching the directory.
    pub fn stop(&mut self) -> Result<()> {
        self.watcher
            .unwatch(&self.directory)
            .map_err(|e| Error::WatcherError(e.to_string()))
    }

    /// Receive the next debounced path that is a regular file.
    ///
    /// Returns `None` if the event channel is closed and nothing is pending.
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        next_debounced(&mut self.event_rx, &mut self.debouncer).await
    }
}

/// Release the oldest path that has been quiet for the debounce window.
///
/// The wait is bounded by the oldest pending deadline, so a path that keeps
/// changing never holds back a path that has gone quiet.
async fn next_debounced(
    rx: &mut mpsc::UnboundedReceiver<PathBuf>,
    debouncer: &mut Debouncer,
) -> Option<PathBuf> {
    loop {
        while let Some(path) = debouncer.flush_next() {
            if path.is_file() {
                return Some(path);
            }
        }

        let deadline = debouncer.next_deadline();
        tokio::select! {
            path = rx.recv() => match path {
                Some(path) => debouncer.add(path),
                None => return debouncer.flush_all().into_iter().find(|p| p.is_file()),
            },
            () = sleep_until_deadline(deadline) => {}
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handle_notify_event(
    matcher: &PatternMatcher,
    event: &Event,
    tx: &mpsc::UnboundedSender<PathBuf>,
) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in &event.paths {
        if matcher.is_excluded(path) {
            tracing::debug!("Skipping excluded file: {}", path.display());
            continue;
        }
        let _ = tx.send(path.clone());
    }
}

/// List the regular files directly inside `directory`, sorted by name.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a pattern is invalid.
pub fn scan_directory(directory: &Path, exclude_patterns: &[String]) -> Result<Vec<PathBuf>> {
    scan_with(directory, &PatternMatcher::new(exclude_patterns)?)
}

fn scan_with(directory: &Path, matcher: &PatternMatcher) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(Error::DirectoryNotFound(directory.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || matcher.is_excluded(&path) {
            continue;
        }
        files.push(path);
    }

    files.sort();
    tracing::debug!("Scan of {} found {} files", directory.display(), files.len());
    Ok(files)
}

/// Debouncer to coalesce rapid file system events.
///
/// Writing a file produces several events in quick succession (create,
/// write, close). The debouncer keeps the latest time a path was touched and
/// releases it only after a quiet period, oldest first.
struct Debouncer {
    pending: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window: window.max(Duration::from_millis(1)),
        }
    }

    fn add(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// When the oldest pending path becomes ready, if any.
    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .min()
            .and_then(|oldest| oldest.checked_add(self.window))
    }

    /// Return the oldest path that has been quiet for the window.
    fn flush_next(&mut self) -> Option<PathBuf> {
        let now = Instant::now();

        let ready = self
            .pending
            .iter()
            .filter(|(_, time)| now.duration_since(**time) >= self.window)
            .min_by_key(|(_, time)| **time)
            .map(|(path, _)| path.clone())?;

        self.pending.remove(&ready);
        Some(ready)
    }

    /// Flush all pending paths regardless of the window, oldest first.
    fn flush_all(&mut self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.pending.drain().collect();
        paths.sort_by_key(|(_, time)| *time);
        paths.into_iter().map(|(path, _)| path).collect()
    }
}

/// Pattern matcher for file exclusions.
///
/// Patterns are matched against the file name only.
pub struct PatternMatcher {
    set: globset::GlobSet,
}

impl PatternMatcher {
    /// Create a new pattern matcher from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is not a valid glob.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = globset::GlobSetBuilder::new();

        for pattern in patterns {
            let glob = globset::Glob::new(pattern)
                .map_err(|e| Error::InvalidPath(format!("Invalid glob pattern: {e}")))?;
            builder.add(glob);
        }

        let set = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build glob set: {e}")))?;

        Ok(Self { set })
    }

    /// Check if a path's file name matches any exclusion pattern.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|name| self.set.is_match(name))
    }
}
