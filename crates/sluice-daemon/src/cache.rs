//! Path resolution cache
//!
//! Maps absolute paths to resolved entities. Entries are evicted least
//! recently used beyond `max_entries` and expire `ttl` after insertion.
//! Failed lookups are never cached.
//!
//! Resolution is single-flight: the first caller for a path registers a
//! flight and walks the backend without holding the map lock; later callers
//! for the same path wait on that flight and share its outcome.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use sluice_core::{FsError, FsResult, VirtualPath};

use crate::entity::Entity;
use crate::pipe::WAIT_TICK;

/// Default number of cached paths
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default time-to-live of a cached path (10 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Cache entry with TTL
struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// One in-progress resolution
struct Flight {
    result: Mutex<Option<FsResult<Entity>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> FsResult<Entity> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.done.wait_for(&mut result, WAIT_TICK);
        }
    }

    fn publish(&self, outcome: FsResult<Entity>) {
        *self.result.lock() = Some(outcome);
        self.done.notify_all();
    }
}

struct Inner {
    entries: LruCache<VirtualPath, CacheEntry<Entity>>,
    flights: HashMap<VirtualPath, Arc<Flight>>,
}

/// Lookup counters
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Served from a valid entry
    pub hits: u64,
    /// Resolved against the backend
    pub misses: u64,
    /// Waited on another caller's resolution
    pub coalesced: u64,
}

/// Single-flight LRU + TTL cache of resolved paths
pub struct PathCache {
    root: Entity,
    inner: Mutex<Inner>,
    ttl: Duration,
    stats: CacheStats,
}

impl PathCache {
    pub fn new(root: Entity, max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            root,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                flights: HashMap::new(),
            }),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn with_defaults(root: Entity) -> Self {
        Self::new(root, DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }

    pub fn root(&self) -> &Entity {
        &self.root
    }

    /// Resolve `path` (made absolute) to its entity.
    ///
    /// `NotFound` if a segment is missing, `NotADirectory` if an ancestor is
    /// a file.
    pub fn resolve(&self, path: &VirtualPath) -> FsResult<Entity> {
        let path = path.to_absolute();
        if path.is_root() {
            return Ok(Arc::clone(&self.root));
        }

        let flight = {
            let mut inner = self.inner.lock();
            let cached = inner
                .entries
                .get(&path)
                .map(|entry| (!entry.is_expired()).then(|| Arc::clone(&entry.data)));
            match cached {
                Some(Some(entity)) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(path = %path, "cache hit");
                    return Ok(entity);
                }
                Some(None) => {
                    trace!(path = %path, "cache entry expired");
                    inner.entries.pop(&path);
                }
                None => {}
            }

            if let Some(flight) = inner.flights.get(&path) {
                let flight = Arc::clone(flight);
                drop(inner);
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path, "waiting on in-flight resolution");
                return flight.wait();
            }

            let flight = Arc::new(Flight::new());
            inner.flights.insert(path.clone(), Arc::clone(&flight));
            flight
        };

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let mut guard = FlightGuard {
            cache: self,
            path: &path,
            flight,
            completed: false,
        };
        let outcome = self.lookup(&path);
        guard.complete(outcome.clone());
        outcome
    }

    /// Walk one step from the (resolved) parent
    fn lookup(&self, path: &VirtualPath) -> FsResult<Entity> {
        let (parent, name) = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Ok(Arc::clone(&self.root)),
        };
        let parent_entity = self.resolve(&parent)?;
        let dir = parent_entity
            .as_directory()
            .ok_or_else(|| FsError::not_a_directory(parent.to_string()))?;
        let found = dir
            .find(name)?
            .ok_or_else(|| FsError::not_found(path.to_string()))?;
        debug!(path = %path, "resolved");
        Ok(found)
    }

    /// Record the outcome of the flight for `path` and wake its waiters
    fn finish(&self, path: &VirtualPath, flight: &Arc<Flight>, outcome: FsResult<Entity>) {
        {
            let mut inner = self.inner.lock();
            // an invalidation while in flight unregisters the flight;
            // its result must not be cached then
            let current = inner
                .flights
                .get(path)
                .map_or(false, |f| Arc::ptr_eq(f, flight));
            if current {
                inner.flights.remove(path);
                if let Ok(entity) = &outcome {
                    inner
                        .entries
                        .put(path.clone(), CacheEntry::new(Arc::clone(entity), self.ttl));
                }
            }
        }
        flight.publish(outcome);
    }

    /// Drop `path` and everything below it
    pub fn invalidate(&self, path: &VirtualPath) {
        let path = path.to_absolute();
        let mut inner = self.inner.lock();
        let stale: Vec<VirtualPath> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(&path))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            inner.entries.pop(key);
        }
        inner.flights.retain(|key, _| !key.starts_with(&path));
        trace!(path = %path, removed = stale.len(), "cache invalidated");
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.flights.clear();
        debug!("cache cleared");
    }

    /// Cached entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a valid entry exists, without touching LRU order
    pub fn contains(&self, path: &VirtualPath) -> bool {
        let path = path.to_absolute();
        self.inner
            .lock()
            .entries
            .peek(&path)
            .map_or(false, |entry| !entry.is_expired())
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Completes the flight even if the lookup panics, so waiters never hang
struct FlightGuard<'a> {
    cache: &'a PathCache,
    path: &'a VirtualPath,
    flight: Arc<Flight>,
    completed: bool,
}

impl FlightGuard<'_> {
    fn complete(&mut self, outcome: FsResult<Entity>) {
        self.completed = true;
        self.cache.finish(self.path, &self.flight, outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.cache.finish(
                self.path,
                &self.flight,
                Err(FsError::interrupted(format!(
                    "resolution of {} abandoned",
                    self.path
                ))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FileChannel, OpenOptions};
    use crate::entity::{VirtualDirectory, VirtualFile};
    use crate::tree::TreeDirectory;
    use sluice_core::Permissions;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Root directory that counts (and optionally slows down) lookups
    struct CountingDir {
        inner: Arc<TreeDirectory>,
        finds: AtomicUsize,
        delay: Duration,
    }

    impl CountingDir {
        fn new(inner: Arc<TreeDirectory>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner,
                finds: AtomicUsize::new(0),
                delay,
            })
        }

        fn finds(&self) -> usize {
            self.finds.load(Ordering::SeqCst)
        }
    }

    impl VirtualFile for CountingDir {
        fn name(&self) -> &str {
            ""
        }

        fn size(&self) -> u64 {
            0
        }

        fn permissions(&self) -> Permissions {
            Permissions::DIR_DEFAULT
        }

        fn open(&self, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
            Err(FsError::is_a_directory("/"))
        }

        fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
            Some(self)
        }
    }

    impl VirtualDirectory for CountingDir {
        fn find(&self, name: &str) -> FsResult<Option<Entity>> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.inner.find(name)
        }

        fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>> {
            self.inner.children()
        }
    }

    /// Root directory whose lookups block until the gate sender is dropped
    struct GatedDir {
        inner: Arc<TreeDirectory>,
        finds: AtomicUsize,
        entered: crossbeam_channel::Sender<()>,
        gate: crossbeam_channel::Receiver<()>,
    }

    impl VirtualFile for GatedDir {
        fn name(&self) -> &str {
            ""
        }

        fn size(&self) -> u64 {
            0
        }

        fn permissions(&self) -> Permissions {
            Permissions::DIR_DEFAULT
        }

        fn open(&self, _options: &OpenOptions) -> FsResult<Box<dyn FileChannel>> {
            Err(FsError::is_a_directory("/"))
        }

        fn as_directory(&self) -> Option<&dyn VirtualDirectory> {
            Some(self)
        }
    }

    impl VirtualDirectory for GatedDir {
        fn find(&self, name: &str) -> FsResult<Option<Entity>> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.entered.send(()).ok();
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            self.inner.find(name)
        }

        fn children(&self) -> FsResult<Box<dyn Iterator<Item = Entity> + Send>> {
            self.inner.children()
        }
    }

    fn sample_tree() -> Arc<TreeDirectory> {
        let root = TreeDirectory::new("");
        root.add_file("a.txt", b"0123456789".to_vec());
        let d = root.add_directory("d");
        d.add_file("inner", b"x".to_vec());
        root
    }

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_root_needs_no_lookup() {
        let root = CountingDir::new(sample_tree(), Duration::ZERO);
        let cache = PathCache::with_defaults(root.clone());
        let entity = cache.resolve(&VirtualPath::root()).unwrap();
        assert!(entity.is_directory());
        assert_eq!(root.finds(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_second_resolution_is_memoized() {
        let root = CountingDir::new(sample_tree(), Duration::ZERO);
        let cache = PathCache::with_defaults(root.clone());

        let first = cache.resolve(&path("/a.txt")).unwrap();
        let second = cache.resolve(&path("/a.txt")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(root.finds(), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_nested_resolution_caches_parents() {
        let root = CountingDir::new(sample_tree(), Duration::ZERO);
        let cache = PathCache::with_defaults(root.clone());

        let inner = cache.resolve(&path("/d/inner")).unwrap();
        assert_eq!(inner.size(), 1);
        assert!(cache.contains(&path("/d")));
        assert!(cache.contains(&path("d/inner")));

        cache.resolve(&path("/d")).unwrap();
        assert_eq!(root.finds(), 1);
    }

    #[test]
    fn test_concurrent_resolution_is_single_flight() {
        let root = CountingDir::new(sample_tree(), Duration::from_millis(150));
        let cache = Arc::new(PathCache::with_defaults(root.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.resolve(&path("/a.txt")).unwrap())
            })
            .collect();
        let entities: Vec<Entity> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(root.finds(), 1);
        for entity in &entities[1..] {
            assert!(Arc::ptr_eq(&entities[0], entity));
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 15);
    }

    #[test]
    fn test_siblings_wait_on_pending_parent_without_deadlock() {
        let tree = TreeDirectory::new("");
        let a = tree.add_directory("a");
        a.add_file("b", b"bb".to_vec());
        a.add_file("c", b"ccc".to_vec());

        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let root = Arc::new(GatedDir {
            inner: tree,
            finds: AtomicUsize::new(0),
            entered: entered_tx,
            gate: gate_rx,
        });
        let cache = Arc::new(PathCache::with_defaults(root.clone()));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let spawn_resolve = |p: &'static str| {
            let cache = Arc::clone(&cache);
            let done = done_tx.clone();
            thread::spawn(move || {
                let size = cache.resolve(&path(p)).map(|e| e.size());
                done.send((p, size)).ok();
            })
        };

        // parent flight is pending while the children race on it
        spawn_resolve("/a");
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("parent lookup never started");
        for _ in 0..4 {
            spawn_resolve("/a/b");
            spawn_resolve("/a/c");
        }
        thread::sleep(Duration::from_millis(100));
        drop(gate_tx);

        let mut sizes = Vec::new();
        for _ in 0..9 {
            let (p, size) = done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("resolution deadlocked");
            sizes.push((p, size.unwrap()));
        }
        assert_eq!(root.finds.load(Ordering::SeqCst), 1);
        assert_eq!(sizes.iter().filter(|(p, s)| *p == "/a/b" && *s == 2).count(), 4);
        assert_eq!(sizes.iter().filter(|(p, s)| *p == "/a/c" && *s == 3).count(), 4);
        assert!(cache.contains(&path("/a/b")));
        assert!(cache.contains(&path("/a/c")));
    }

    #[test]
    fn test_concurrent_failure_reaches_every_waiter() {
        let root = CountingDir::new(sample_tree(), Duration::from_millis(150));
        let cache = Arc::new(PathCache::with_defaults(root.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.resolve(&path("/missing")))
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Err(FsError::NotFound(_))));
        }
        assert!(root.finds() >= 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_not_found_is_not_cached() {
        let tree = sample_tree();
        let root = CountingDir::new(Arc::clone(&tree), Duration::ZERO);
        let cache = PathCache::with_defaults(root.clone());

        assert!(matches!(
            cache.resolve(&path("/later.txt")),
            Err(FsError::NotFound(_))
        ));
        tree.add_file("later.txt", b"now".to_vec());
        let entity = cache.resolve(&path("/later.txt")).unwrap();
        assert_eq!(entity.size(), 3);
        assert_eq!(root.finds(), 2);
    }

    #[test]
    fn test_file_parent_is_not_a_directory() {
        let cache = PathCache::with_defaults(sample_tree());
        assert!(matches!(
            cache.resolve(&path("/a.txt/x")),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_ttl_expiry() {
        let root = CountingDir::new(sample_tree(), Duration::ZERO);
        let cache = PathCache::new(root.clone(), 10, Duration::from_millis(20));

        cache.resolve(&path("/a.txt")).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!cache.contains(&path("/a.txt")));
        cache.resolve(&path("/a.txt")).unwrap();
        assert_eq!(root.finds(), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let tree = sample_tree();
        tree.add_file("b", Vec::new());
        tree.add_file("c", Vec::new());
        let cache = PathCache::new(tree, 2, DEFAULT_TTL);

        cache.resolve(&path("/a.txt")).unwrap();
        cache.resolve(&path("/b")).unwrap();
        cache.resolve(&path("/a.txt")).unwrap();
        cache.resolve(&path("/c")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&path("/a.txt")));
        assert!(!cache.contains(&path("/b")));
    }

    #[test]
    fn test_invalidate_subtree() {
        let cache = PathCache::with_defaults(sample_tree());
        cache.resolve(&path("/d/inner")).unwrap();
        cache.resolve(&path("/a.txt")).unwrap();
        assert_eq!(cache.len(), 3);

        cache.invalidate(&path("/d"));
        assert!(!cache.contains(&path("/d")));
        assert!(!cache.contains(&path("/d/inner")));
        assert!(cache.contains(&path("/a.txt")));

        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
