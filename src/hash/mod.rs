//! In-memory extendible hash table.
//!
//! Used both as the buffer pool's page table (`page_id -> frame index`) and
//! as the lock manager's lock table (`RID -> lock queue`). Directory
//! structure is guarded by a table-level [`Latch`](crate::latch::Latch);
//! each bucket carries its own latch so lookups and inserts into disjoint
//! buckets proceed without contending on the directory.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::latch::Latch;

/// Ceiling on global depth: one bit short of the hash's bit width, matching
/// the original engine's `max_global_depth = sizeof(size_t) * 8 - 1`.
const MAX_GLOBAL_DEPTH: usize = 63;

struct Bucket<K, V> {
    local_depth: usize,
    entries: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(local_depth: usize) -> Self {
        Bucket {
            local_depth,
            entries: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == key) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }
}

struct Directory<K, V> {
    global_depth: usize,
    buckets: Vec<Arc<Latch<Bucket<K, V>>>>,
}

/// A concurrent extendible hash table mapping `K` to `V`.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    directory: Latch<Directory<K, V>>,
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn index_of(hash: u64, depth: usize) -> usize {
    if depth == 0 {
        0
    } else {
        (hash & ((1u64 << depth) - 1)) as usize
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        let first_bucket = Arc::new(Latch::new(Bucket::new(0)));
        ExtendibleHashTable {
            bucket_size,
            directory: Latch::new(Directory {
                global_depth: 0,
                buckets: vec![first_bucket],
            }),
        }
    }

    pub fn global_depth(&self) -> usize {
        self.directory.read().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        let dir = self.directory.read();
        let mut seen: Vec<*const Latch<Bucket<K, V>>> = Vec::new();
        for b in &dir.buckets {
            let ptr = Arc::as_ptr(b);
            if !seen.contains(&ptr) {
                seen.push(ptr);
            }
        }
        seen.len()
    }

    pub fn local_depth_of(&self, key: &K) -> usize {
        let hash = hash_of(key);
        let dir = self.directory.read();
        let idx = index_of(hash, dir.global_depth);
        dir.buckets[idx].read().local_depth
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let hash = hash_of(key);
        let bucket = {
            let dir = self.directory.read();
            let idx = index_of(hash, dir.global_depth);
            Arc::clone(&dir.buckets[idx])
        };
        bucket.read().find(key).cloned()
    }

    pub fn remove(&self, key: &K) -> bool {
        let hash = hash_of(key);
        let bucket = {
            let dir = self.directory.read();
            let idx = index_of(hash, dir.global_depth);
            Arc::clone(&dir.buckets[idx])
        };
        bucket.write().remove(key)
    }

    /// Insert or update `key`. Retries internally across directory
    /// splits/doublings until the value fits.
    pub fn insert(&self, key: K, value: V) {
        loop {
            let hash = hash_of(&key);
            let bucket = {
                let dir = self.directory.read();
                let idx = index_of(hash, dir.global_depth);
                Arc::clone(&dir.buckets[idx])
            };
            {
                let mut guard = bucket.write();
                if let Some(slot) = guard.entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                    return;
                }
                if guard.entries.len() < self.bucket_size {
                    guard.entries.push((key, value));
                    return;
                }
            }
            self.split_and_retry(&key);
        }
    }

    /// Splits the bucket that `key` currently hashes to, doubling the
    /// directory first if the bucket's local depth has caught up to the
    /// global depth.
    fn split_and_retry(&self, key: &K) {
        let hash = hash_of(key);
        let mut dir = self.directory.write();
        let idx = index_of(hash, dir.global_depth);
        let old_bucket = Arc::clone(&dir.buckets[idx]);
        let local_depth = old_bucket.read().local_depth;

        if local_depth == dir.global_depth {
            if dir.global_depth >= MAX_GLOBAL_DEPTH {
                // Implementation ceiling; unreachable for any realistic key
                // distribution and bucket size.
                return;
            }
            let doubled: Vec<Arc<Latch<Bucket<K, V>>>> = dir
                .buckets
                .iter()
                .cloned()
                .chain(dir.buckets.iter().cloned())
                .collect();
            dir.buckets = doubled;
            dir.global_depth += 1;
        }

        let new_local_depth = local_depth + 1;
        let new_bit = 1u64 << local_depth;

        let zero_bucket = Arc::new(Latch::new(Bucket::new(new_local_depth)));
        let one_bucket = Arc::new(Latch::new(Bucket::new(new_local_depth)));

        {
            let old = old_bucket.read();
            for (k, v) in old.entries.iter() {
                let h = hash_of(k);
                let target = if h & new_bit == 0 {
                    &zero_bucket
                } else {
                    &one_bucket
                };
                target.write().entries.push((k.clone(), v.clone()));
            }
        }

        for i in 0..dir.buckets.len() {
            if Arc::ptr_eq(&dir.buckets[i], &old_bucket) {
                dir.buckets[i] = if (i as u64) & new_bit == 0 {
                    Arc::clone(&zero_bucket)
                } else {
                    Arc::clone(&one_bucket)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_last_inserted_value() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);
        table.insert(1, 100);
        table.insert(1, 200);
        assert_eq!(table.find(&1), Some(200));
    }

    #[test]
    fn remove_then_find_is_absent() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);
        table.insert(5, 50);
        assert!(table.remove(&5));
        assert_eq!(table.find(&5), None);
    }

    #[test]
    fn overflow_triggers_split_and_directory_growth() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);
        for k in 0..64u32 {
            table.insert(k, k * 10);
        }
        for k in 0..64u32 {
            assert_eq!(table.find(&k), Some(k * 10));
        }
        assert!(table.global_depth() >= 1);
        for k in 0..64u32 {
            assert!(table.local_depth_of(&k) <= table.global_depth());
        }
    }
}
