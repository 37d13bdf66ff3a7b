//! An open connection to one device.

use super::cache::{FileSignature, MetadataCache};
use super::capabilities::DeviceCapabilities;
use super::drivers::Driver;
use super::progress::{CancelToken, Operation, Progress, ProgressEvent};
use super::registry::BusyGuard;
use super::upload_path::create_upload_path;
use super::{SlotId, StorageSlot, base_path};
use crate::book::{BookMetadata, BookRecord, extension_of};
use crate::cover::{CoverRenderer, ImageCoverRenderer};
use crate::error::{DeviceError, Result};
use crate::formats::{ReaderRegistry, metadata_from_filename};
use crate::fs::{self, DeviceFilesystem, FileEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_true() -> bool {
    true
}

/// User settings that shape how a session behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Read metadata from file content on cache misses.
    #[serde(default = "default_true")]
    pub read_metadata: bool,

    /// Place uploads in author/title subdirectories where the device allows it.
    #[serde(default = "default_true")]
    pub use_subdirs: bool,

    /// Write the cache after every upload or delete instead of only at eject.
    #[serde(default = "default_true")]
    pub flush_on_mutation: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_metadata: true,
            use_subdirs: true,
            flush_on_mutation: true,
        }
    }
}

/// Lifecycle of a session. `Ejected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, not yet opened.
    Unopened,
    /// Open for listing, upload and delete.
    Open,
    /// Closed for good.
    Ejected,
}

/// Options for a single upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace a file already at the destination.
    pub overwrite: bool,
}

/// One file of a batch upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// File on the host.
    pub local_path: PathBuf,
    /// Target slot.
    pub slot: SlotId,
    /// Destination relative to the slot root. Computed from the metadata when `None`.
    pub relative_path: Option<String>,
    /// Metadata for the cache and the cover sidecar.
    pub metadata: BookMetadata,
}

/// Result of one file of a batch upload.
#[derive(Debug)]
pub struct UploadOutcome {
    /// File on the host.
    pub local_path: PathBuf,
    /// The stored book, or why it was not stored.
    pub result: Result<BookRecord>,
}

struct SlotState {
    fs: Box<dyn DeviceFilesystem>,
    slot: StorageSlot,
    cache: MetadataCache,
}

impl SlotState {
    fn refresh_space(&mut self) {
        match self.fs.space() {
            Ok(space) => {
                self.slot.free_bytes = space.free_bytes;
                self.slot.total_bytes = space.total_bytes;
            }
            Err(e) => {
                tracing::warn!(slot = %self.slot.id, error = %e, "Free space unknown, not enforcing limits");
                self.slot.free_bytes = u64::MAX;
                self.slot.total_bytes = 0;
            }
        }
    }

    fn flush(&mut self, cache_name: &str) {
        if let Err(e) = self.cache.flush(self.fs.as_ref(), cache_name) {
            tracing::warn!(slot = %self.slot.id, error = %e, "Failed to write metadata cache");
        }
    }
}

/// An open connection to a device, bound by its [`DeviceCapabilities`].
///
/// Sessions are created by a [`DeviceRegistry`](super::DeviceRegistry) and
/// must be opened before use. Dropping an open session ejects it.
pub struct DeviceSession {
    driver: Driver,
    settings: SessionSettings,
    readers: ReaderRegistry,
    covers: Arc<dyn CoverRenderer>,
    slots: BTreeMap<SlotId, SlotState>,
    state: SessionState,
    guard: Option<BusyGuard>,
}

impl DeviceSession {
    /// Session over the given slot backends, with default settings, readers and covers.
    pub fn new(driver: Driver, backends: BTreeMap<SlotId, Box<dyn DeviceFilesystem>>) -> Self {
        let slots = backends
            .into_iter()
            .map(|(id, fs)| {
                let slot = StorageSlot {
                    id,
                    root: Some(fs.root().to_path_buf()),
                    free_bytes: 0,
                    total_bytes: 0,
                };
                (
                    id,
                    SlotState {
                        fs,
                        slot,
                        cache: MetadataCache::new(),
                    },
                )
            })
            .collect();

        Self {
            driver,
            settings: SessionSettings::default(),
            readers: ReaderRegistry::builtin(),
            covers: Arc::new(ImageCoverRenderer::default()),
            slots,
            state: SessionState::Unopened,
            guard: None,
        }
    }

    /// Replaces the settings.
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the metadata readers.
    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    /// Replaces the cover renderer.
    pub fn with_cover_renderer(mut self, covers: Arc<dyn CoverRenderer>) -> Self {
        self.covers = covers;
        self
    }

    pub(crate) fn with_guard(mut self, guard: BusyGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Driver this session was opened with.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Capabilities of the device.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.driver.capabilities
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Registry key of the physical device, while the session holds it.
    pub fn key(&self) -> Option<&str> {
        self.guard.as_ref().map(BusyGuard::key)
    }

    /// All three slots, absent ones with no root.
    pub fn slots(&self) -> Vec<StorageSlot> {
        SlotId::ALL
            .into_iter()
            .map(|id| {
                self.slots
                    .get(&id)
                    .map(|s| s.slot.clone())
                    .unwrap_or_else(|| StorageSlot::absent(id))
            })
            .collect()
    }

    /// One slot, if present.
    pub fn slot(&self, id: SlotId) -> Option<&StorageSlot> {
        self.slots.get(&id).map(|s| &s.slot)
    }

    /// Metadata cache of a slot.
    pub fn cache(&self, id: SlotId) -> Option<&MetadataCache> {
        self.slots.get(&id).map(|s| &s.cache)
    }

    /// File system of a slot.
    pub fn filesystem(&self, id: SlotId) -> Option<&dyn DeviceFilesystem> {
        self.slots.get(&id).map(|s| s.fs.as_ref())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            _ => Err(DeviceError::NotConnected),
        }
    }

    fn slot_state(&mut self, id: SlotId) -> Result<&mut SlotState> {
        self.slots
            .get_mut(&id)
            .ok_or(DeviceError::SlotUnavailable(id))
    }

    /// Opens the session: checks main memory, reads free space and loads caches.
    ///
    /// Opening an open session does nothing.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Open => {
                tracing::debug!(driver = self.driver.name(), "Session already open");
                return Ok(());
            }
            SessionState::Ejected => return Err(DeviceError::NotConnected),
            SessionState::Unopened => {}
        }

        let main = self
            .slots
            .get(&SlotId::Main)
            .ok_or_else(|| DeviceError::NotReady("main memory is not mounted".into()))?;
        if !main.fs.is_dir("") {
            return Err(DeviceError::NotReady(format!(
                "main memory {} is not available",
                main.fs.describe()
            )));
        }

        let cache_name = self.driver.capabilities.metadata_cache_name.clone();
        for state in self.slots.values_mut() {
            state.refresh_space();
            state.cache = MetadataCache::load(state.fs.as_ref(), &cache_name);
        }

        self.state = SessionState::Open;
        tracing::info!(
            driver = self.driver.name(),
            slots = self.slots.len(),
            "Opened device session"
        );
        Ok(())
    }

    /// Flushes dirty caches and closes the session. Never fails.
    pub fn eject(&mut self) {
        if self.state == SessionState::Ejected {
            return;
        }

        if self.state == SessionState::Open {
            let cache_name = self.driver.capabilities.metadata_cache_name.clone();
            for state in self.slots.values_mut() {
                if state.cache.is_dirty() {
                    state.flush(&cache_name);
                }
            }
        }

        self.slots.clear();
        self.guard = None;
        self.state = SessionState::Ejected;
        tracing::info!(driver = self.driver.name(), "Ejected device");
    }

    /// Lists the books on a slot.
    ///
    /// The walk happens lazily as the iterator is consumed. Exhausting the
    /// iterator drops cache entries for files that no longer exist.
    pub fn list_books(&mut self, slot: SlotId) -> Result<BookIter<'_>> {
        self.list_books_with_progress(slot, Progress::none())
    }

    /// Like [`list_books`](Self::list_books), reporting each file to `progress`.
    pub fn list_books_with_progress(
        &mut self,
        slot: SlotId,
        progress: Progress,
    ) -> Result<BookIter<'_>> {
        self.ensure_open()?;

        let Self {
            driver,
            settings,
            readers,
            covers,
            slots,
            ..
        } = self;
        let caps = &driver.capabilities;

        let Some(state) = slots.get_mut(&slot) else {
            return Ok(BookIter { slot, inner: None });
        };

        let book_dir = caps.book_dir(slot);
        let entries: Vec<FileEntry> = state
            .fs
            .list(book_dir, caps.supports_subdirectories)?
            .into_iter()
            .filter(|e| !is_hidden(&e.path))
            .filter(|e| extension_of(&e.path).is_some_and(|ext| caps.supports_format(&ext)))
            .collect();

        tracing::debug!(%slot, dir = book_dir, files = entries.len(), "Listing books");

        Ok(BookIter {
            slot,
            inner: Some(Listing {
                total: entries.len(),
                entries: entries.into_iter(),
                state,
                caps,
                settings,
                readers,
                covers: &**covers,
                progress,
                done: 0,
                seen: HashSet::new(),
            }),
        })
    }

    /// Slot-relative destination for a new book, following the device layout.
    pub fn upload_path(&self, slot: SlotId, metadata: &BookMetadata, file_name: &str) -> Result<String> {
        self.ensure_open()?;
        let state = self.slots.get(&slot).ok_or(DeviceError::SlotUnavailable(slot))?;
        let caps = &self.driver.capabilities;
        let use_subdirs = caps.supports_subdirectories && self.settings.use_subdirs;
        Ok(create_upload_path(
            &state.fs.describe(),
            caps.book_dir(slot),
            use_subdirs,
            metadata,
            file_name,
        ))
    }

    /// Copies a host file onto a slot.
    ///
    /// Nothing is written when the format is unsupported, the slot lacks
    /// space, or the destination is taken and `overwrite` is off. The
    /// destination must lie in the slot's book directory, at its top level
    /// on devices without subdirectory support. A cover
    /// sidecar failure is logged and does not fail the upload.
    pub fn upload(
        &mut self,
        local: &Path,
        slot: SlotId,
        relative_path: &str,
        metadata: &BookMetadata,
        options: &UploadOptions,
    ) -> Result<BookRecord> {
        self.ensure_open()?;
        let relative_path = relative_path.trim_matches('/').to_string();

        let ext = extension_of(&relative_path)
            .filter(|ext| self.driver.capabilities.supports_format(ext))
            .ok_or_else(|| DeviceError::UnsupportedFormat(relative_path.clone()))?;
        check_destination(&self.driver.capabilities, slot, &relative_path)?;

        let size = std::fs::metadata(local)?.len();
        let cache_name = self.driver.capabilities.metadata_cache_name.clone();
        let flush = self.settings.flush_on_mutation;
        let cover_hook = self
            .driver
            .capabilities
            .supports_cover_upload
            .then_some(self.driver.capabilities.hooks);
        let thumbnail_height = self.driver.capabilities.thumbnail_height;
        let covers = self.covers.clone();

        let state = self.slot_state(slot)?;
        if size > state.slot.free_bytes {
            return Err(DeviceError::InsufficientSpace {
                needed: size,
                available: state.slot.free_bytes,
            });
        }
        if state.fs.exists(&relative_path) && !options.overwrite {
            return Err(DeviceError::PathConflict(relative_path));
        }

        state.fs.copy_in(local, &relative_path)?;
        let entry = state.fs.stat(&relative_path)?;
        let stored = cached_metadata(&*covers, thumbnail_height, metadata.clone());
        state.cache.put(
            &relative_path,
            FileSignature::new(entry.size, entry.mtime),
            &stored,
        );

        if let Some(hooks) = cover_hook {
            match hooks.upload_cover(
                state.fs.as_ref(),
                &relative_path,
                metadata,
                &*covers,
                thumbnail_height,
            ) {
                Ok(Some(path)) => tracing::debug!(%slot, path, "Wrote cover sidecar"),
                Ok(None) => {}
                Err(e) => tracing::warn!(%slot, path = %relative_path, error = %e, "Cover upload failed"),
            }
        }

        state.refresh_space();
        if flush {
            state.flush(&cache_name);
        }

        tracing::info!(%slot, path = %relative_path, size = entry.size, "Uploaded book");
        Ok(BookRecord {
            relative_path,
            slot,
            format_extension: ext,
            size_bytes: entry.size,
            mtime: entry.mtime,
            metadata: stored,
        })
    }

    /// Uploads many files, continuing past failures.
    ///
    /// The cancel token is checked before each file; once set, every
    /// remaining file is reported as [`DeviceError::Cancelled`].
    pub fn upload_books(
        &mut self,
        requests: &[UploadRequest],
        options: &UploadOptions,
        progress: &Progress,
        cancel: &CancelToken,
    ) -> Vec<UploadOutcome> {
        let total = requests.len();
        let mut outcomes = Vec::with_capacity(total);

        for (i, request) in requests.iter().enumerate() {
            let result = if cancel.is_cancelled() {
                Err(DeviceError::Cancelled)
            } else {
                self.upload_request(request, options)
            };

            if let Err(e) = &result {
                tracing::warn!(file = %request.local_path.display(), error = %e, "Upload failed");
            }
            progress.report(ProgressEvent {
                operation: Operation::Upload,
                done: i + 1,
                total: Some(total),
                path: request.local_path.display().to_string(),
            });
            outcomes.push(UploadOutcome {
                local_path: request.local_path.clone(),
                result,
            });
        }

        outcomes
    }

    fn upload_request(&mut self, request: &UploadRequest, options: &UploadOptions) -> Result<BookRecord> {
        let relative_path = match &request.relative_path {
            Some(path) => path.clone(),
            None => {
                let file_name = request
                    .local_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| DeviceError::InvalidPath(request.local_path.display().to_string()))?;
                self.upload_path(request.slot, &request.metadata, &file_name)?
            }
        };
        self.upload(
            &request.local_path,
            request.slot,
            &relative_path,
            &request.metadata,
            options,
        )
    }

    /// Removes a book, its sidecars and its cache entry.
    ///
    /// A primary file that is already gone is not an error. Missing sidecars
    /// are ignored.
    pub fn delete(&mut self, book: &BookRecord) -> Result<()> {
        self.ensure_open()?;
        let caps = &self.driver.capabilities;
        let book_dir = caps.book_dir(book.slot).to_string();
        let sidecars = caps.auxiliary_delete_extensions.clone();
        let prune_dirs = caps.supports_subdirectories;
        let cache_name = caps.metadata_cache_name.clone();
        let flush = self.settings.flush_on_mutation;

        let state = self.slot_state(book.slot)?;
        let path = book.relative_path.trim_matches('/');

        match state.fs.remove_file(path) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(path, "Book file already absent");
            }
            Err(e) => {
                return Err(DeviceError::Delete {
                    path: path.to_string(),
                    source: Box::new(e),
                });
            }
        }

        let base = base_path(path);
        for ext in &sidecars {
            let sidecar = format!("{base}{ext}");
            match state.fs.remove_file(&sidecar) {
                Ok(()) => tracing::debug!(path = %sidecar, "Removed sidecar"),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(path = %sidecar, error = %e, "Failed to remove sidecar"),
            }
        }

        if prune_dirs {
            state.fs.remove_empty_dirs(fs::parent(path), &book_dir);
        }

        state.cache.remove(path);
        state.refresh_space();
        if flush {
            state.flush(&cache_name);
        }

        tracing::info!(slot = %book.slot, path, "Deleted book");
        Ok(())
    }

    /// Deletes many books, continuing past failures.
    pub fn delete_books(
        &mut self,
        books: &[BookRecord],
        progress: &Progress,
        cancel: &CancelToken,
    ) -> Vec<Result<()>> {
        let total = books.len();
        books
            .iter()
            .enumerate()
            .map(|(i, book)| {
                let result = if cancel.is_cancelled() {
                    Err(DeviceError::Cancelled)
                } else {
                    self.delete(book)
                };
                if let Err(e) = &result {
                    tracing::warn!(path = %book.relative_path, error = %e, "Delete failed");
                }
                progress.report(ProgressEvent {
                    operation: Operation::Delete,
                    done: i + 1,
                    total: Some(total),
                    path: book.relative_path.clone(),
                });
                result
            })
            .collect()
    }

    /// Writes every dirty cache now.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        let cache_name = self.driver.capabilities.metadata_cache_name.clone();
        for state in self.slots.values_mut() {
            state.cache.flush(state.fs.as_ref(), &cache_name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("driver", &self.driver.name())
            .field("state", &self.state)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("key", &self.key())
            .finish()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.eject();
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|c| c.starts_with('.'))
}

/// An upload must land where listing will find it again.
fn check_destination(caps: &DeviceCapabilities, slot: SlotId, path: &str) -> Result<()> {
    let book_dir = caps.book_dir(slot);
    let within = if book_dir.is_empty() {
        Some(path)
    } else {
        path.strip_prefix(book_dir).and_then(|rest| rest.strip_prefix('/'))
    };
    match within {
        Some(rest)
            if !rest.is_empty()
                && !is_hidden(rest)
                && (caps.supports_subdirectories || !rest.contains('/')) =>
        {
            Ok(())
        }
        _ => Err(DeviceError::InvalidPath(path.to_string())),
    }
}

/// Metadata as stored in the cache: the cover becomes a thumbnail.
fn cached_metadata(covers: &dyn CoverRenderer, height: u32, mut metadata: BookMetadata) -> BookMetadata {
    if let Some(cover) = metadata.cover.take() {
        match covers.render_cover(&cover, None, height) {
            Ok(thumb) => metadata.cover = Some(thumb),
            Err(e) => tracing::debug!(error = %e, "Dropping unreadable cover"),
        }
    }
    metadata
}

struct Listing<'a> {
    state: &'a mut SlotState,
    caps: &'a DeviceCapabilities,
    settings: &'a SessionSettings,
    readers: &'a ReaderRegistry,
    covers: &'a dyn CoverRenderer,
    progress: Progress,
    entries: std::vec::IntoIter<FileEntry>,
    total: usize,
    done: usize,
    seen: HashSet<String>,
}

impl Listing<'_> {
    fn advance(&mut self, slot: SlotId) -> Option<BookRecord> {
        let entry = self.entries.next()?;
        let sig = FileSignature::new(entry.size, entry.mtime);
        let file_name = entry.path.rsplit('/').next().unwrap_or(&entry.path).to_string();

        let metadata = match self.state.cache.get(&entry.path, sig) {
            Some(metadata) => {
                tracing::debug!(path = %entry.path, "Metadata cache hit");
                metadata
            }
            None => {
                tracing::debug!(path = %entry.path, "Metadata cache miss");
                let derived = self.derive(&entry.path, &file_name);
                let stored = cached_metadata(self.covers, self.caps.thumbnail_height, derived);
                self.state.cache.put(&entry.path, sig, &stored);
                stored
            }
        };

        self.done += 1;
        self.progress.report(ProgressEvent {
            operation: Operation::List,
            done: self.done,
            total: Some(self.total),
            path: entry.path.clone(),
        });
        self.seen.insert(entry.path.clone());

        Some(BookRecord {
            format_extension: extension_of(&entry.path).unwrap_or_default(),
            relative_path: entry.path,
            slot,
            size_bytes: entry.size,
            mtime: entry.mtime,
            metadata,
        })
    }

    fn derive(&self, path: &str, file_name: &str) -> BookMetadata {
        let from_content = self.settings.read_metadata || self.caps.must_read_metadata;
        let reader = extension_of(path).and_then(|ext| self.readers.get(&ext).cloned());

        let mut metadata = match reader.filter(|_| from_content) {
            Some(reader) => {
                let read = self
                    .state
                    .fs
                    .read(path)
                    .and_then(|data| Ok(reader.read_metadata(&data, file_name)?));
                match read {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        tracing::debug!(path, error = %e, "Metadata unreadable, using file name");
                        metadata_from_filename(file_name)
                    }
                }
            }
            None => metadata_from_filename(file_name),
        };

        self.caps.hooks.adjust_metadata(file_name, &mut metadata);
        metadata
    }

    fn finish(self) {
        let seen = self.seen;
        let dropped = self.state.cache.retain(|path| seen.contains(path));
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned stale cache entries");
        }
        if self.settings.flush_on_mutation && self.state.cache.is_dirty() {
            self.state.flush(&self.caps.metadata_cache_name);
        }
    }
}

/// Lazy sequence of the books on one slot.
pub struct BookIter<'a> {
    slot: SlotId,
    inner: Option<Listing<'a>>,
}

impl BookIter<'_> {
    /// Slot being listed.
    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

impl Iterator for BookIter<'_> {
    type Item = BookRecord;

    fn next(&mut self) -> Option<BookRecord> {
        let listing = self.inner.as_mut()?;
        if let Some(record) = listing.advance(self.slot) {
            return Some(record);
        }
        if let Some(listing) = self.inner.take() {
            listing.finish();
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.inner.as_ref().map_or(0, |l| l.entries.len());
        (remaining, Some(remaining))
    }
}
