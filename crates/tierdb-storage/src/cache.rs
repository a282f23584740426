//! Block cache - size-bounded LRU cache of decoded blocks
//!
//! Blocks are keyed by (table id, block offset) and handed out as `Arc`s.
//! An entry whose `Arc` is still held by a reader is pinned: eviction
//! skips it. Capacity is a byte budget, since blocks vary in size, and
//! the resident total never exceeds it. A block that cannot be made to
//! fit is returned to the caller without being cached.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tierdb_core::Result;
use tracing::trace;

/// Anything stored in a [`BlockCache`] reports its memory footprint
pub trait CacheWeight {
    fn weight(&self) -> usize;
}

/// Unique identifier for a cached block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub table_id: u64,
    pub offset: u64,
}

struct Slot<B> {
    block: Arc<B>,
    weight: usize,
    tick: u64,
}

struct LruState<B> {
    slots: HashMap<BlockKey, Slot<B>>,
    /// Access tick -> key, oldest first
    recency: BTreeMap<u64, BlockKey>,
    resident: usize,
    tick: u64,
}

impl<B> LruState<B> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &BlockKey) -> Option<Slot<B>> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.tick);
        self.resident -= slot.weight;
        Some(slot)
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity_bytes: usize,
    pub resident_bytes: usize,
    pub block_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inserts: u64,
}

impl CacheStats {
    /// Hit rate as a fraction (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent, byte-bounded LRU block cache
pub struct BlockCache<B> {
    name: &'static str,
    capacity: usize,
    state: Mutex<LruState<B>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    inserts: AtomicU64,
}

impl<B: CacheWeight> BlockCache<B> {
    /// Create a cache holding at most `capacity` bytes of blocks
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            state: Mutex::new(LruState {
                slots: HashMap::new(),
                recency: BTreeMap::new(),
                resident: 0,
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Look up a block, marking it most recently used
    pub fn get(&self, table_id: u64, offset: u64) -> Option<Arc<B>> {
        let key = BlockKey { table_id, offset };
        let mut state = self.state.lock();
        let tick = state.next_tick();

        let (block, old_tick) = match state.slots.get_mut(&key) {
            Some(slot) => {
                let old = slot.tick;
                slot.tick = tick;
                (Arc::clone(&slot.block), old)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        state.recency.remove(&old_tick);
        state.recency.insert(tick, key);

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(block)
    }

    /// Insert a freshly decoded block and return a pinned handle to it
    pub fn put(&self, table_id: u64, offset: u64, block: B) -> Arc<B> {
        let key = BlockKey { table_id, offset };
        let weight = block.weight();
        let block = Arc::new(block);

        if weight > self.capacity {
            return block;
        }

        let mut state = self.state.lock();
        state.remove(&key);

        if state.resident + weight > self.capacity {
            let needed = state.resident + weight - self.capacity;
            let mut freed = 0;
            let mut victims = Vec::new();
            for (_, victim) in state.recency.iter() {
                if freed >= needed {
                    break;
                }
                if let Some(slot) = state.slots.get(victim) {
                    // Held outside the cache: pinned by an in-flight read
                    if Arc::strong_count(&slot.block) > 1 {
                        continue;
                    }
                    freed += slot.weight;
                    victims.push(*victim);
                }
            }

            if freed < needed {
                trace!(cache = self.name, weight, "no room for block, everything pinned");
                return block;
            }

            for victim in victims {
                state.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let tick = state.next_tick();
        state.slots.insert(
            key,
            Slot {
                block: Arc::clone(&block),
                weight,
                tick,
            },
        );
        state.recency.insert(tick, key);
        state.resident += weight;
        self.inserts.fetch_add(1, Ordering::Relaxed);

        block
    }

    /// Return the cached block or decode it with `load` and cache it
    pub fn get_or_load<F>(&self, table_id: u64, offset: u64, load: F) -> Result<Arc<B>>
    where
        F: FnOnce() -> Result<B>,
    {
        if let Some(block) = self.get(table_id, offset) {
            return Ok(block);
        }
        let block = load()?;
        Ok(self.put(table_id, offset, block))
    }

    /// Drop every block belonging to a table
    pub fn invalidate_table(&self, table_id: u64) {
        let mut state = self.state.lock();
        let keys: Vec<BlockKey> = state
            .slots
            .keys()
            .filter(|k| k.table_id == table_id)
            .copied()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        if !keys.is_empty() {
            trace!(cache = self.name, table_id, blocks = keys.len(), "invalidated table");
        }
    }

    pub fn contains(&self, table_id: u64, offset: u64) -> bool {
        self.state
            .lock()
            .slots
            .contains_key(&BlockKey { table_id, offset })
    }

    pub fn resident_bytes(&self) -> usize {
        self.state.lock().resident
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            capacity_bytes: self.capacity,
            resident_bytes: state.resident,
            block_count: state.slots.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

impl<B> std::fmt::Debug for BlockCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug)]
    struct TestBlock(usize);

    impl CacheWeight for TestBlock {
        fn weight(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_put_and_get() {
        let cache = BlockCache::new("test", 1000);
        cache.put(1, 0, TestBlock(100));
        cache.put(1, 100, TestBlock(200));

        assert_eq!(cache.get(1, 0).unwrap().0, 100);
        assert_eq!(cache.get(1, 100).unwrap().0, 200);
        assert!(cache.get(2, 0).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.resident_bytes, 300);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = BlockCache::new("test", 300);
        cache.put(1, 0, TestBlock(100));
        cache.put(1, 1, TestBlock(100));
        cache.put(1, 2, TestBlock(100));

        // Touch block 0 so block 1 becomes the oldest
        assert!(cache.get(1, 0).is_some());
        cache.put(1, 3, TestBlock(100));

        assert!(cache.contains(1, 0));
        assert!(!cache.contains(1, 1));
        assert!(cache.contains(1, 2));
        assert!(cache.contains(1, 3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_resident_bytes_never_exceed_capacity() {
        let cache = BlockCache::new("test", 10_000);
        for i in 0..500u64 {
            cache.put(i % 7, i, TestBlock(37 + (i as usize * 131) % 900));
            assert!(cache.resident_bytes() <= cache.capacity());
        }
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_pinned_blocks_survive_eviction() {
        let cache = BlockCache::new("test", 1000);
        let pinned = cache.put(1, 0, TestBlock(400));

        for i in 1..50u64 {
            cache.put(2, i, TestBlock(300));
            assert!(cache.resident_bytes() <= cache.capacity());
        }
        assert!(cache.contains(1, 0));
        assert_eq!(pinned.0, 400);

        drop(pinned);
        for i in 50..60u64 {
            cache.put(2, i, TestBlock(300));
        }
        assert!(!cache.contains(1, 0));
    }

    #[test]
    fn test_block_is_returned_uncached_when_everything_is_pinned() {
        let cache = BlockCache::new("test", 500);
        let _a = cache.put(1, 0, TestBlock(250));
        let _b = cache.put(1, 1, TestBlock(250));

        let c = cache.put(1, 2, TestBlock(100));
        assert_eq!(c.0, 100);
        assert!(!cache.contains(1, 2));
        assert_eq!(cache.resident_bytes(), 500);
    }

    #[test]
    fn test_oversized_block_is_not_cached() {
        let cache = BlockCache::new("test", 100);
        let block = cache.put(1, 0, TestBlock(101));
        assert_eq!(block.0, 101);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_table() {
        let cache = BlockCache::new("test", 1000);
        cache.put(1, 0, TestBlock(10));
        cache.put(1, 10, TestBlock(10));
        cache.put(2, 0, TestBlock(10));

        cache.invalidate_table(1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.resident_bytes(), 10);
        assert!(cache.contains(2, 0));
    }

    #[test]
    fn test_get_or_load_only_loads_on_miss() {
        let cache = BlockCache::new("test", 1000);
        let mut loads = 0;
        for _ in 0..3 {
            let block = cache
                .get_or_load(5, 0, || {
                    loads += 1;
                    Ok(TestBlock(64))
                })
                .unwrap();
            assert_eq!(block.0, 64);
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(BlockCache::new("test", 50_000));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let offset = i % 97;
                        let block = cache
                            .get_or_load(t % 3, offset, || Ok(TestBlock(100 + offset as usize)))
                            .unwrap();
                        assert_eq!(block.0, 100 + offset as usize);
                        assert!(cache.resident_bytes() <= cache.capacity());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
