//! File Cache Manager - preloaded sound bank memory
//!
//! Files referenced by preload requests are read into memory blocks and
//! registered with the backend. The cache works against a fixed byte
//! budget:
//! - Bytes are accounted when a read starts, not when it finishes
//! - Manually loaded files are use-counted; at zero uses they become
//!   `REMOVABLE` and are the only candidates for eviction
//! - Eviction frees every removable file at once, without regard to recency
//! - A file that cannot fit even after eviction is flagged `MEM_ALLOC_FAIL`
//!   until a later attempt succeeds
//!
//! ## Streaming
//!
//! Asynchronous reads run on a dedicated reader thread. The memory block is
//! moved to the reader and back; completions are applied in
//! [`FileCacheManager::update`]. A read whose entry was uncached in the
//! meantime is dropped on arrival.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::controls::PreloadRequest;
use crate::middleware::{AudioMiddleware, FileEntryInfo, ImplNode};
use crate::types::{DataScope, FileEntryId, INVALID_FILE_ENTRY_ID, RequestStatus, audio_string_to_id};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ═══════════════════════════════════════════════════════════════════════════════
// FLAGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileEntryFlags(u16);

impl FileEntryFlags {
    pub const NONE: Self = Self(0);
    pub const CACHED: Self = Self(1 << 0);
    pub const LOADING: Self = Self(1 << 1);
    pub const NOT_FOUND: Self = Self(1 << 2);
    pub const MEM_ALLOC_FAIL: Self = Self(1 << 3);
    /// Loaded on demand and reference counted
    pub const USE_COUNTED: Self = Self(1 << 4);
    /// Use-counted with no remaining users; first to go under memory pressure
    pub const REMOVABLE: Self = Self(1 << 5);
    pub const LOCALIZED: Self = Self(1 << 6);
    /// Autoloaded file also referenced by a manual request
    pub const NEEDS_RESET_TO_MANUAL_LOADING: Self = Self(1 << 7);

    #[inline]
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for FileEntryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY BLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Heap block whose payload starts at the requested alignment
#[derive(Debug)]
pub struct AlignedBlock {
    bytes: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBlock {
    /// `None` when the allocation fails
    fn allocate(len: usize, alignment: usize) -> Option<Self> {
        let alignment = alignment.max(1);
        let mut bytes: Vec<u8> = Vec::new();
        bytes.try_reserve_exact(len + alignment - 1).ok()?;
        let offset = match bytes.as_ptr().align_offset(alignment) {
            usize::MAX => 0,
            offset => offset,
        };
        Some(Self { bytes, offset, len })
    }

    /// Fill the payload from `path`; never reallocates
    fn read_from(&mut self, path: &Path) -> io::Result<()> {
        let mut file = File::open(path)?;
        self.bytes.clear();
        self.bytes.resize(self.offset + self.len, 0);
        file.read_exact(&mut self.bytes[self.offset..])
    }

    pub fn as_slice(&self) -> &[u8] {
        self.bytes
            .get(self.offset..self.offset + self.len)
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE ENTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct FileEntry {
    pub id: FileEntryId,
    pub path: PathBuf,
    pub size: usize,
    pub use_count: usize,
    pub flags: FileEntryFlags,
    pub scope: DataScope,
    pub info: FileEntryInfo,
    memory: Option<AlignedBlock>,
    /// Bumped whenever a read is started or abandoned
    ticket: u64,
}

impl FileEntry {
    #[inline]
    pub fn is_cached_or_loading(&self) -> bool {
        self.flags
            .intersects(FileEntryFlags::CACHED | FileEntryFlags::LOADING)
    }

    pub fn memory(&self) -> Option<&[u8]> {
        self.memory.as_ref().map(AlignedBlock::as_slice)
    }
}

struct ReadJob {
    entry_id: FileEntryId,
    ticket: u64,
    path: PathBuf,
    block: AlignedBlock,
}

struct ReadCompletion {
    entry_id: FileEntryId,
    ticket: u64,
    result: io::Result<AlignedBlock>,
}

fn read_file(mut job: ReadJob) -> ReadCompletion {
    let result = job.block.read_from(&job.path).map(|_| job.block);
    ReadCompletion {
        entry_id: job.entry_id,
        ticket: job.ticket,
        result,
    }
}

fn file_size(path: &Path) -> Option<usize> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len() as usize)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FileCacheManager {
    entries: HashMap<FileEntryId, FileEntry>,
    max_bytes: usize,
    current_bytes: usize,
    jobs: Option<Sender<ReadJob>>,
    completions: Receiver<ReadCompletion>,
    reader: Option<JoinHandle<()>>,
}

impl FileCacheManager {
    pub fn new(max_bytes: usize) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<ReadJob>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let reader = match thread::Builder::new()
            .name("atl-file-reader".into())
            .spawn(move || {
                for job in job_rx {
                    if done_tx.send(read_file(job)).is_err() {
                        break;
                    }
                }
            }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn file reader thread: {}. Loads will block.", e);
                None
            }
        };

        Self {
            entries: HashMap::new(),
            max_bytes,
            current_bytes: 0,
            jobs: reader.as_ref().map(|_| job_tx),
            completions: done_rx,
            reader,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn entry(&self, id: FileEntryId) -> Option<&FileEntry> {
        self.entries.get(&id)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Entries
    // ───────────────────────────────────────────────────────────────────────────

    /// Create (or share) the entry described by a preload file node
    pub fn try_add_file_cache_entry(
        &mut self,
        node: &ImplNode,
        scope: DataScope,
        auto_load: bool,
        middleware: &mut dyn AudioMiddleware,
    ) -> FileEntryId {
        let Some(info) = middleware.parse_audio_file_entry(node) else {
            log::warn!("Backend could not parse file entry '{}'", node.name);
            return INVALID_FILE_ENTRY_ID;
        };

        let path = Path::new(&middleware.audio_file_location(&info)).join(&info.file_name);
        let id = audio_string_to_id(&path.to_string_lossy());

        if let Some(existing) = self.entries.get_mut(&id) {
            if !auto_load && !existing.flags.contains(FileEntryFlags::USE_COUNTED) {
                // Manual request referencing an autoloaded file
                existing
                    .flags
                    .insert(FileEntryFlags::USE_COUNTED | FileEntryFlags::NEEDS_RESET_TO_MANUAL_LOADING);
            }
            middleware.delete_file_entry_data(info.data);
            return id;
        }

        let mut flags = FileEntryFlags::NONE;
        if info.localized {
            flags.insert(FileEntryFlags::LOCALIZED);
        }
        if !auto_load {
            flags.insert(FileEntryFlags::USE_COUNTED);
        }
        let size = match file_size(&path) {
            Some(size) => size,
            None => {
                log::warn!("Preload file not found: {}", path.display());
                flags.insert(FileEntryFlags::NOT_FOUND);
                0
            }
        };

        self.entries.insert(
            id,
            FileEntry {
                id,
                path,
                size,
                use_count: 0,
                flags,
                scope,
                info,
                memory: None,
                ticket: 0,
            },
        );
        id
    }

    /// Remove an entry of `scope`; level removal of an upgraded autoload entry downgrades it instead
    pub fn try_remove_file_cache_entry(
        &mut self,
        id: FileEntryId,
        scope: DataScope,
        middleware: &mut dyn AudioMiddleware,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };

        if entry.scope == scope {
            self.uncache_file(id, middleware);
            if let Some(entry) = self.entries.remove(&id) {
                middleware.delete_file_entry_data(entry.info.data);
            }
            true
        } else if scope == DataScope::LevelSpecific
            && entry.flags.contains(FileEntryFlags::NEEDS_RESET_TO_MANUAL_LOADING)
        {
            entry.flags.remove(
                FileEntryFlags::NEEDS_RESET_TO_MANUAL_LOADING
                    | FileEntryFlags::USE_COUNTED
                    | FileEntryFlags::REMOVABLE,
            );
            entry.use_count = 0;
            true
        } else {
            false
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Preload requests
    // ───────────────────────────────────────────────────────────────────────────

    pub fn try_load_request(
        &mut self,
        request: &mut PreloadRequest,
        load_synchronously: bool,
        auto_load_only: bool,
        middleware: &mut dyn AudioMiddleware,
    ) -> RequestStatus {
        if auto_load_only && !request.auto_load {
            log::debug!("Preload '{}' skipped: not an autoload request", request.name);
            return RequestStatus::Failure;
        }

        let mut full_success = true;
        let mut full_failure = true;
        for &file_id in &request.file_entry_ids {
            let cached = self.try_cache_entry(file_id, load_synchronously, None, middleware);
            full_success &= cached;
            full_failure &= !cached;
        }

        request.all_loaded = full_success;
        let status = aggregate(full_success, full_failure);
        log::debug!("Preload '{}': {:?}", request.name, status);
        status
    }

    pub fn try_unload_request(
        &mut self,
        request: &mut PreloadRequest,
        middleware: &mut dyn AudioMiddleware,
    ) -> RequestStatus {
        let mut full_success = true;
        let mut full_failure = true;
        for &file_id in &request.file_entry_ids {
            let uncached = self.uncache_entry(file_id, true, false, middleware);
            full_success &= uncached;
            full_failure &= !uncached;
        }

        request.all_loaded = false;
        aggregate(full_success, full_failure)
    }

    /// Forcibly uncache every entry belonging to `scope`
    pub fn unload_data_by_scope(&mut self, scope: DataScope, middleware: &mut dyn AudioMiddleware) {
        let ids: Vec<_> = self
            .entries
            .values()
            .filter(|e| scope.covers(e.scope))
            .map(|e| e.id)
            .collect();
        for id in ids {
            self.uncache_entry(id, true, true, middleware);
        }
    }

    /// Reload localized entries from the backend's current language folder
    pub fn update_localized_file_cache_entries(&mut self, middleware: &mut dyn AudioMiddleware) {
        let localized: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.flags.contains(FileEntryFlags::LOCALIZED))
            .map(|e| (e.id, e.is_cached_or_loading(), e.use_count))
            .collect();

        for (id, was_cached, use_count) in localized {
            if was_cached {
                self.uncache_file(id, middleware);
            }

            if let Some(entry) = self.entries.get_mut(&id) {
                entry.path =
                    Path::new(&middleware.audio_file_location(&entry.info)).join(&entry.info.file_name);
                match file_size(&entry.path) {
                    Some(size) => {
                        entry.size = size;
                        entry.flags.remove(FileEntryFlags::NOT_FOUND);
                    }
                    None => {
                        entry.size = 0;
                        entry.flags.insert(FileEntryFlags::NOT_FOUND);
                    }
                }
            }

            if was_cached && !self.try_cache_entry(id, true, Some(use_count), middleware) {
                log::warn!("Localized file {} could not be reloaded", id);
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Caching
    // ───────────────────────────────────────────────────────────────────────────

    /// Start loading `id` (or count another use if already cached/loading)
    fn try_cache_entry(
        &mut self,
        id: FileEntryId,
        load_synchronously: bool,
        override_use_count: Option<usize>,
        middleware: &mut dyn AudioMiddleware,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!("Preload references unknown file entry {}", id);
            return false;
        };

        let success = if entry.is_cached_or_loading() {
            true
        } else {
            match file_size(&entry.path) {
                Some(size) => {
                    entry.size = size;
                    entry.flags.remove(FileEntryFlags::NOT_FOUND);
                    self.start_caching(id, load_synchronously, middleware)
                }
                None => {
                    entry.flags.insert(FileEntryFlags::NOT_FOUND);
                    log::warn!("File not found: {}", entry.path.display());
                    false
                }
            }
        };

        if success {
            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.flags.contains(FileEntryFlags::USE_COUNTED) {
                    entry.use_count = override_use_count.unwrap_or(entry.use_count + 1);
                    if entry.use_count > 0 {
                        entry.flags.remove(FileEntryFlags::REMOVABLE);
                    } else {
                        entry.flags.insert(FileEntryFlags::REMOVABLE);
                    }
                }
            }
        }
        success
    }

    fn start_caching(
        &mut self,
        id: FileEntryId,
        load_synchronously: bool,
        middleware: &mut dyn AudioMiddleware,
    ) -> bool {
        let Some((size, alignment)) = self
            .entries
            .get(&id)
            .map(|e| (e.size, e.info.memory_alignment))
        else {
            return false;
        };

        if !self.ensure_space(size, middleware) {
            return self.fail_allocation(id, "does not fit in the cache budget");
        }

        let block = match AlignedBlock::allocate(size, alignment) {
            Some(block) => block,
            None => {
                // Fragmentation: evict and try once more
                self.uncache_removable(middleware);
                match AlignedBlock::allocate(size, alignment) {
                    Some(block) => block,
                    None => return self.fail_allocation(id, "allocation failed"),
                }
            }
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.flags.remove(FileEntryFlags::MEM_ALLOC_FAIL);
        entry.flags.insert(FileEntryFlags::LOADING);
        entry.ticket += 1;
        self.current_bytes += size;

        let job = ReadJob {
            entry_id: id,
            ticket: entry.ticket,
            path: entry.path.clone(),
            block,
        };

        // Without a reader thread the read happens inline
        let inline_job = match self.jobs.as_ref().filter(|_| !load_synchronously) {
            Some(jobs) => jobs.send(job).err().map(|err| err.into_inner()),
            None => Some(job),
        };
        if let Some(job) = inline_job {
            let completion = read_file(job);
            self.finish_stream(completion, middleware);
        }

        // A failed synchronous read leaves the entry uncached
        self.entries
            .get(&id)
            .is_some_and(FileEntry::is_cached_or_loading)
    }

    fn fail_allocation(&mut self, id: FileEntryId, reason: &str) -> bool {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.flags.insert(FileEntryFlags::MEM_ALLOC_FAIL);
            log::error!(
                "Cannot cache {} ({:.2} MB, cache {:.2}/{:.2} MB): {}",
                entry.path.display(),
                entry.size as f64 / BYTES_PER_MB,
                self.current_bytes as f64 / BYTES_PER_MB,
                self.max_bytes as f64 / BYTES_PER_MB,
                reason
            );
        }
        false
    }

    /// Make room for `size` bytes, evicting removable entries if that suffices
    fn ensure_space(&mut self, size: usize, middleware: &mut dyn AudioMiddleware) -> bool {
        let free = self.max_bytes.saturating_sub(self.current_bytes);
        if size <= free {
            return true;
        }

        let removable: usize = self
            .entries
            .values()
            .filter(|e| e.flags.contains(FileEntryFlags::CACHED | FileEntryFlags::REMOVABLE))
            .map(|e| e.size)
            .sum();
        if size > free + removable {
            return false;
        }

        self.uncache_removable(middleware);
        size <= self.max_bytes.saturating_sub(self.current_bytes)
    }

    fn uncache_removable(&mut self, middleware: &mut dyn AudioMiddleware) {
        let ids: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.flags.contains(FileEntryFlags::CACHED | FileEntryFlags::REMOVABLE))
            .map(|e| e.id)
            .collect();
        for id in ids {
            self.uncache_file(id, middleware);
        }
    }

    /// Drop one use; at zero uses the entry becomes removable and is
    /// uncached when `now` (or unconditionally with `ignore_use_count`)
    fn uncache_entry(
        &mut self,
        id: FileEntryId,
        now: bool,
        ignore_use_count: bool,
        middleware: &mut dyn AudioMiddleware,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };

        if entry.use_count > 0 {
            entry.use_count -= 1;
        }
        if ignore_use_count {
            entry.use_count = 0;
        }
        if entry.use_count > 0 {
            return false;
        }

        if entry.flags.contains(FileEntryFlags::USE_COUNTED) {
            entry.flags.insert(FileEntryFlags::REMOVABLE);
        }
        if now || ignore_use_count {
            self.uncache_file(id, middleware);
            return true;
        }
        false
    }

    /// Release memory and budget; an in-flight read is abandoned
    fn uncache_file(&mut self, id: FileEntryId, middleware: &mut dyn AudioMiddleware) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if !entry.is_cached_or_loading() {
            return;
        }

        if entry.flags.contains(FileEntryFlags::CACHED) {
            middleware.unregister_in_memory_file(&entry.info);
        }
        entry.memory = None;
        entry.ticket += 1;
        entry
            .flags
            .remove(FileEntryFlags::CACHED | FileEntryFlags::LOADING | FileEntryFlags::REMOVABLE);
        self.current_bytes = self.current_bytes.saturating_sub(entry.size);
        log::debug!(
            "Uncached {} ({:.2} MB, cache now {:.2} MB)",
            entry.path.display(),
            entry.size as f64 / BYTES_PER_MB,
            self.current_bytes as f64 / BYTES_PER_MB
        );
    }

    fn finish_stream(&mut self, completion: ReadCompletion, middleware: &mut dyn AudioMiddleware) {
        let Some(entry) = self.entries.get_mut(&completion.entry_id) else {
            log::trace!("Read finished for removed file entry {}", completion.entry_id);
            return;
        };
        if entry.ticket != completion.ticket || !entry.flags.contains(FileEntryFlags::LOADING) {
            log::trace!("Read of {} was aborted", entry.path.display());
            return;
        }

        match completion.result {
            Ok(block) => {
                entry.flags.remove(FileEntryFlags::LOADING);
                entry.flags.insert(FileEntryFlags::CACHED);
                middleware.register_in_memory_file(&entry.info, block.as_slice());
                entry.memory = Some(block);
                log::debug!(
                    "Cached {} ({:.2} MB, cache now {:.2} MB)",
                    entry.path.display(),
                    entry.size as f64 / BYTES_PER_MB,
                    self.current_bytes as f64 / BYTES_PER_MB
                );
            }
            Err(e) => {
                log::error!("Failed to read {}: {}", entry.path.display(), e);
                if e.kind() == io::ErrorKind::NotFound {
                    entry.flags.insert(FileEntryFlags::NOT_FOUND);
                }
                self.uncache_file(completion.entry_id, middleware);
            }
        }
    }

    /// Apply finished reads
    pub fn update(&mut self, middleware: &mut dyn AudioMiddleware) {
        loop {
            match self.completions.try_recv() {
                Ok(completion) => self.finish_stream(completion, middleware),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Uncache and delete every entry
    pub fn release(&mut self, middleware: &mut dyn AudioMiddleware) {
        let ids: Vec<_> = self.entries.keys().copied().collect();
        for id in ids {
            self.uncache_file(id, middleware);
        }
        for (_, entry) in self.entries.drain() {
            middleware.delete_file_entry_data(entry.info.data);
        }
        self.current_bytes = 0;
    }

    fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                log::error!("File reader thread panicked");
            }
        }
    }
}

impl Drop for FileCacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn aggregate(full_success: bool, full_failure: bool) -> RequestStatus {
    if full_success {
        RequestStatus::Success
    } else if full_failure {
        RequestStatus::Failure
    } else {
        RequestStatus::PartialSuccess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockMiddleware;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture(files: &[(&str, usize)]) -> (TempDir, MockMiddleware) {
        let dir = tempfile::tempdir().unwrap();
        for (name, size) in files {
            std::fs::write(dir.path().join(name), vec![7u8; *size]).unwrap();
        }
        let mw = MockMiddleware::with_file_root(dir.path());
        (dir, mw)
    }

    fn request(cache: &mut FileCacheManager, mw: &mut MockMiddleware, names: &[&str], auto_load: bool) -> PreloadRequest {
        let file_entry_ids = names
            .iter()
            .map(|n| cache.try_add_file_cache_entry(&ImplNode::new("MockFile", *n), DataScope::Global, auto_load, mw))
            .collect();
        PreloadRequest {
            id: 1,
            name: "test".into(),
            scope: DataScope::Global,
            auto_load,
            file_entry_ids,
            all_loaded: false,
        }
    }

    #[test]
    fn test_partial_success_with_missing_file() {
        let (_dir, mut mw) = fixture(&[("one.bnk", 100), ("three.bnk", 300)]);
        let mut cache = FileCacheManager::new(10_000);
        let mut req = request(&mut cache, &mut mw, &["one.bnk", "two.bnk", "three.bnk"], false);

        let status = cache.try_load_request(&mut req, true, false, &mut mw);
        assert_eq!(status, RequestStatus::PartialSuccess);
        assert!(!req.all_loaded);

        let ids = &req.file_entry_ids;
        assert!(cache.entry(ids[0]).unwrap().flags.contains(FileEntryFlags::CACHED));
        assert!(cache.entry(ids[1]).unwrap().flags.contains(FileEntryFlags::NOT_FOUND));
        assert!(cache.entry(ids[2]).unwrap().flags.contains(FileEntryFlags::CACHED));
        assert_eq!(cache.current_bytes(), 400);
        assert_eq!(cache.entry(ids[2]).unwrap().memory().map(<[u8]>::len), Some(300));
        assert_eq!(mw.state.lock().registered_files.len(), 2);
    }

    #[test]
    fn test_oversized_file_fails_sticky() {
        let (_dir, mut mw) = fixture(&[("big.bnk", 2_000), ("small.bnk", 10)]);
        let mut cache = FileCacheManager::new(1_000);
        let mut req = request(&mut cache, &mut mw, &["big.bnk"], false);

        assert_eq!(cache.try_load_request(&mut req, true, false, &mut mw), RequestStatus::Failure);
        let entry = cache.entry(req.file_entry_ids[0]).unwrap();
        assert!(entry.flags.contains(FileEntryFlags::MEM_ALLOC_FAIL));
        assert!(!entry.is_cached_or_loading());
        assert_eq!(cache.current_bytes(), 0);

        // Flag stays until a later attempt succeeds
        let mut small = request(&mut cache, &mut mw, &["small.bnk"], false);
        cache.try_load_request(&mut small, true, false, &mut mw);
        assert!(cache
            .entry(req.file_entry_ids[0])
            .unwrap()
            .flags
            .contains(FileEntryFlags::MEM_ALLOC_FAIL));
    }

    #[test]
    fn test_eviction_of_removable_entries() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 600), ("b.bnk", 600)]);
        let mut cache = FileCacheManager::new(1_000);
        let mut a = request(&mut cache, &mut mw, &["a.bnk"], false);
        let mut b = request(&mut cache, &mut mw, &["b.bnk"], false);

        assert_eq!(cache.try_load_request(&mut a, true, false, &mut mw), RequestStatus::Success);
        // b does not fit while a is still in use
        assert_eq!(cache.try_load_request(&mut b, true, false, &mut mw), RequestStatus::Failure);
        assert!(cache.entry(b.file_entry_ids[0]).unwrap().flags.contains(FileEntryFlags::MEM_ALLOC_FAIL));

        // Drop a's use without unloading: it stays cached but removable
        assert!(!cache.uncache_entry(a.file_entry_ids[0], false, false, &mut mw));
        let entry_a = cache.entry(a.file_entry_ids[0]).unwrap();
        assert!(entry_a.flags.contains(FileEntryFlags::CACHED | FileEntryFlags::REMOVABLE));

        assert_eq!(cache.try_load_request(&mut b, true, false, &mut mw), RequestStatus::Success);
        assert!(!cache.entry(a.file_entry_ids[0]).unwrap().is_cached_or_loading());
        let entry_b = cache.entry(b.file_entry_ids[0]).unwrap();
        assert!(entry_b.flags.contains(FileEntryFlags::CACHED));
        assert!(!entry_b.flags.contains(FileEntryFlags::MEM_ALLOC_FAIL));
        assert!(cache.current_bytes() <= cache.max_bytes());
    }

    #[test]
    fn test_use_count_and_unload() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 50)]);
        let mut cache = FileCacheManager::new(1_000);
        let mut first = request(&mut cache, &mut mw, &["a.bnk"], false);
        let mut second = request(&mut cache, &mut mw, &["a.bnk"], false);
        assert_eq!(first.file_entry_ids, second.file_entry_ids);
        let id = first.file_entry_ids[0];

        cache.try_load_request(&mut first, true, false, &mut mw);
        cache.try_load_request(&mut second, true, false, &mut mw);
        assert_eq!(cache.entry(id).unwrap().use_count, 2);
        assert!(!cache.entry(id).unwrap().flags.contains(FileEntryFlags::REMOVABLE));

        assert_eq!(cache.try_unload_request(&mut first, &mut mw), RequestStatus::Failure);
        assert!(cache.entry(id).unwrap().flags.contains(FileEntryFlags::CACHED));
        assert_eq!(cache.try_unload_request(&mut second, &mut mw), RequestStatus::Success);
        assert!(!cache.entry(id).unwrap().is_cached_or_loading());
        assert_eq!(cache.current_bytes(), 0);
        assert!(mw.state.lock().registered_files.is_empty());
    }

    #[test]
    fn test_autoload_only_skips_manual_requests() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 50)]);
        let mut cache = FileCacheManager::new(1_000);
        let mut req = request(&mut cache, &mut mw, &["a.bnk"], false);
        assert_eq!(cache.try_load_request(&mut req, true, true, &mut mw), RequestStatus::Failure);
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn test_async_load_completes_in_update() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 4096)]);
        let mut cache = FileCacheManager::new(1 << 20);
        let mut req = request(&mut cache, &mut mw, &["a.bnk"], true);
        let id = req.file_entry_ids[0];

        assert_eq!(cache.try_load_request(&mut req, false, true, &mut mw), RequestStatus::Success);
        assert_eq!(cache.current_bytes(), 4096);

        for _ in 0..200 {
            cache.update(&mut mw);
            if cache.entry(id).unwrap().flags.contains(FileEntryFlags::CACHED) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let entry = cache.entry(id).unwrap();
        assert!(entry.flags.contains(FileEntryFlags::CACHED));
        assert!(!entry.flags.contains(FileEntryFlags::LOADING));
        assert_eq!(entry.use_count, 0);
    }

    #[test]
    fn test_aborted_read_is_ignored() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 4096)]);
        let mut cache = FileCacheManager::new(1 << 20);
        let mut req = request(&mut cache, &mut mw, &["a.bnk"], false);
        let id = req.file_entry_ids[0];

        cache.try_load_request(&mut req, false, false, &mut mw);
        cache.unload_data_by_scope(DataScope::Global, &mut mw);
        assert_eq!(cache.current_bytes(), 0);

        std::thread::sleep(Duration::from_millis(50));
        cache.update(&mut mw);
        assert!(!cache.entry(id).unwrap().is_cached_or_loading());
        assert_eq!(mw.count("register_in_memory_file"), 0);
    }

    #[test]
    fn test_manual_reference_upgrades_and_level_clear_downgrades() {
        let (_dir, mut mw) = fixture(&[("a.bnk", 10)]);
        let mut cache = FileCacheManager::new(1_000);
        let node = ImplNode::new("MockFile", "a.bnk");
        let id = cache.try_add_file_cache_entry(&node, DataScope::Global, true, &mut mw);
        assert!(!cache.entry(id).unwrap().flags.contains(FileEntryFlags::USE_COUNTED));

        let same = cache.try_add_file_cache_entry(&node, DataScope::LevelSpecific, false, &mut mw);
        assert_eq!(same, id);
        let flags = cache.entry(id).unwrap().flags;
        assert!(flags.contains(FileEntryFlags::USE_COUNTED | FileEntryFlags::NEEDS_RESET_TO_MANUAL_LOADING));
        assert_eq!(cache.num_entries(), 1);

        assert!(cache.try_remove_file_cache_entry(id, DataScope::LevelSpecific, &mut mw));
        let flags = cache.entry(id).unwrap().flags;
        assert!(!flags.contains(FileEntryFlags::USE_COUNTED));

        assert!(cache.try_remove_file_cache_entry(id, DataScope::Global, &mut mw));
        assert!(cache.entry(id).is_none());
    }

    #[test]
    fn test_localized_entries_follow_language() {
        let dir = tempfile::tempdir().unwrap();
        for lang in ["english", "french"] {
            std::fs::create_dir(dir.path().join(lang)).unwrap();
        }
        std::fs::write(dir.path().join("english/vo.bnk"), vec![1u8; 10]).unwrap();
        std::fs::write(dir.path().join("french/vo.bnk"), vec![2u8; 20]).unwrap();
        let mut mw = MockMiddleware::with_file_root(dir.path());
        mw.state.lock().language = "english".into();

        let mut cache = FileCacheManager::new(1_000);
        let node = ImplNode::new("MockFile", "vo.bnk").with_property("localized", serde_json::Value::Bool(true));
        let id = cache.try_add_file_cache_entry(&node, DataScope::Global, false, &mut mw);
        let mut req = PreloadRequest {
            id: 1,
            name: "vo".into(),
            scope: DataScope::Global,
            auto_load: false,
            file_entry_ids: vec![id],
            all_loaded: false,
        };
        cache.try_load_request(&mut req, true, false, &mut mw);
        assert_eq!(cache.current_bytes(), 10);

        mw.state.lock().language = "french".into();
        cache.update_localized_file_cache_entries(&mut mw);
        let entry = cache.entry(id).unwrap();
        assert!(entry.flags.contains(FileEntryFlags::CACHED));
        assert_eq!(entry.size, 20);
        assert_eq!(entry.use_count, 1);
        assert_eq!(entry.memory().unwrap()[0], 2);
        assert_eq!(cache.current_bytes(), 20);
    }

    #[test]
    fn test_unused_localized_entry_stays_removable_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        for lang in ["english", "french"] {
            std::fs::create_dir(dir.path().join(lang)).unwrap();
            std::fs::write(dir.path().join(lang).join("vo.bnk"), vec![1u8; 10]).unwrap();
        }
        let mut mw = MockMiddleware::with_file_root(dir.path());
        mw.state.lock().language = "english".into();

        let mut cache = FileCacheManager::new(1_000);
        let node = ImplNode::new("MockFile", "vo.bnk").with_property("localized", serde_json::Value::Bool(true));
        let id = cache.try_add_file_cache_entry(&node, DataScope::Global, false, &mut mw);
        let mut req = PreloadRequest {
            id: 1,
            name: "vo".into(),
            scope: DataScope::Global,
            auto_load: false,
            file_entry_ids: vec![id],
            all_loaded: false,
        };
        cache.try_load_request(&mut req, true, false, &mut mw);
        assert!(!cache.uncache_entry(id, false, false, &mut mw));
        assert!(cache.entry(id).unwrap().flags.contains(FileEntryFlags::REMOVABLE));

        mw.state.lock().language = "french".into();
        cache.update_localized_file_cache_entries(&mut mw);
        let entry = cache.entry(id).unwrap();
        assert_eq!(entry.use_count, 0);
        assert!(entry.flags.contains(FileEntryFlags::CACHED | FileEntryFlags::REMOVABLE));
    }

    #[test]
    fn test_aligned_block() {
        let mut block = AlignedBlock::allocate(5, 64).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"hello").unwrap();
        block.read_from(&path).unwrap();
        assert_eq!(block.as_slice(), b"hello");
        assert_eq!(block.as_slice().as_ptr() as usize % 64, 0);
    }
}
