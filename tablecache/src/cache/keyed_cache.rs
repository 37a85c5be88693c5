// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! On-demand keyed cache
//!
//! Rows sharing a key are fetched together the first time the key is asked
//! for. Each key moves through three states:
//!
//! ```text
//! unknown ──get──▶ fetching (sentinel) ──fetch ok──▶ known (possibly empty)
//!    ▲                    │                               │
//!    └────fetch failed────┘                               │
//!    └──────────────────────invalidate────────────────────┘
//! ```
//!
//! The sentinel doubles as a per-key lock: callers asking for a key that is
//! being fetched wait on that key's sentinel, never on the whole cache, so a
//! slow key does not hold up unrelated ones. The cache-wide map lock is held
//! only to install or retire entries, never across a remote fetch.

use super::invalidation::Invalidate;
use super::{decode_keys, CacheKey, CacheStats, StatsRecorder};
use crate::error::{CacheError, CacheResult};
use crate::row::KeyedBy;
use crate::source::{FilterExpr, FilterValue, RowSource};
use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Every group of a fully loaded keyed cache
pub type KeyedGroups<K, R> = HashMap<K, Arc<Vec<R>>>;

enum KeySlot<R> {
    Fetching(Arc<InFlight>),
    Known(Arc<Vec<R>>),
}

/// Sentinel of a fetch in progress
struct InFlight {
    /// Set when the key is invalidated mid-fetch; the result is then returned
    /// to its caller but not cached
    invalidated: AtomicBool,
    settled: Mutex<bool>,
    done: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            invalidated: AtomicBool::new(false),
            settled: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    fn wait(&self) {
        let mut settled = self.settled.lock();
        while !*settled {
            self.done.wait(&mut settled);
        }
    }

    fn settle(&self) {
        *self.settled.lock() = true;
        self.done.notify_all();
    }
}

/// Retires a sentinel when its fetch ends, whether it returned, failed, or
/// unwound
struct FlightGuard<'a, K: CacheKey, R: KeyedBy<K>> {
    cache: &'a KeyedCache<K, R>,
    key: &'a K,
    flight: Arc<InFlight>,
}

impl<K: CacheKey, R: KeyedBy<K>> Drop for FlightGuard<'_, K, R> {
    fn drop(&mut self) {
        {
            let mut entries = self.cache.entries.write();
            if holds_flight(&entries, self.key, &self.flight) {
                entries.remove(self.key);
            }
        }
        self.flight.settle();
    }
}

/// Keys invalidated while a bulk load was fetching
struct BulkWatch<K> {
    keys: HashSet<K>,
    everything: bool,
}

impl<K> Default for BulkWatch<K> {
    fn default() -> Self {
        Self {
            keys: HashSet::new(),
            everything: false,
        }
    }
}

impl<K: CacheKey> BulkWatch<K> {
    fn is_clean(&self) -> bool {
        !self.everything && self.keys.is_empty()
    }
}

fn holds_flight<K: CacheKey, R>(
    entries: &HashMap<K, KeySlot<R>>,
    key: &K,
    flight: &Arc<InFlight>,
) -> bool {
    matches!(entries.get(key), Some(KeySlot::Fetching(current)) if Arc::ptr_eq(current, flight))
}

/// Per-key row lists fetched on first demand
pub struct KeyedCache<K: CacheKey, R: KeyedBy<K>> {
    source: Arc<dyn RowSource<R>>,
    entries: RwLock<HashMap<K, KeySlot<R>>>,
    /// Present once every key is known
    all: ArcSwapOption<KeyedGroups<K, R>>,
    /// Serializes bulk loads
    bulk: Mutex<()>,
    /// Present while a bulk load is fetching; taken after `entries` when both
    /// are held
    bulk_watch: Mutex<Option<BulkWatch<K>>>,
    /// Bumped by anything that makes an in-flight bulk load stale
    bulk_generation: AtomicU64,
    stats: StatsRecorder,
}

impl<K: CacheKey, R: KeyedBy<K>> KeyedCache<K, R> {
    pub fn new(source: Arc<dyn RowSource<R>>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            all: ArcSwapOption::empty(),
            bulk: Mutex::new(()),
            bulk_watch: Mutex::new(None),
            bulk_generation: AtomicU64::new(0),
            stats: StatsRecorder::default(),
        }
    }

    /// Rows with key `key`, fetching them on first demand
    ///
    /// Known keys are answered without waiting. Concurrent callers for a key
    /// that is being fetched wait for that single fetch.
    pub fn get(&self, key: &K) -> CacheResult<Arc<Vec<R>>> {
        loop {
            if let Some(all) = self.all.load_full() {
                self.stats.hit();
                return Ok(Self::lookup(&all, key));
            }

            let waiting = match self.entries.read().get(key) {
                Some(KeySlot::Known(rows)) => {
                    self.stats.hit();
                    return Ok(Arc::clone(rows));
                }
                Some(KeySlot::Fetching(flight)) => Some(Arc::clone(flight)),
                None => None,
            };
            if let Some(flight) = waiting {
                flight.wait();
                continue;
            }

            let flight = Arc::new(InFlight::new());
            {
                let mut entries = self.entries.write();
                if let Some(all) = self.all.load_full() {
                    self.stats.hit();
                    return Ok(Self::lookup(&all, key));
                }
                match entries.get(key) {
                    Some(KeySlot::Known(rows)) => {
                        self.stats.hit();
                        return Ok(Arc::clone(rows));
                    }
                    // Lost the race to another fetcher; wait on its sentinel
                    Some(KeySlot::Fetching(_)) => continue,
                    None => {
                        entries.insert(key.clone(), KeySlot::Fetching(Arc::clone(&flight)));
                    }
                }
            }

            self.stats.miss();
            return self.fetch_key(key, flight);
        }
    }

    fn fetch_key(&self, key: &K, flight: Arc<InFlight>) -> CacheResult<Arc<Vec<R>>> {
        let guard = FlightGuard {
            cache: self,
            key,
            flight,
        };

        let predicate = FilterExpr::KeyEquals {
            column: R::KEY_COLUMN,
            value: key.to_filter_value(),
        };
        let mut rows = self.fetch(Some(&predicate))?;
        rows.retain(|row| row.key() == *key);
        let rows = Arc::new(rows);

        {
            let mut entries = self.entries.write();
            if holds_flight(&entries, key, &guard.flight) && !guard.flight.is_invalidated() {
                entries.insert(key.clone(), KeySlot::Known(Arc::clone(&rows)));
            } else {
                log::debug!(
                    "Key {:?} of '{}' changed while fetching; result not cached",
                    key,
                    R::TABLE
                );
            }
        }
        drop(guard);
        Ok(rows)
    }

    /// Every key's rows, loaded with one bulk fetch the first time
    ///
    /// Once loaded, calls take no lock until something invalidates the cache.
    pub fn get_all(&self) -> CacheResult<Arc<KeyedGroups<K, R>>> {
        if let Some(all) = self.all.load_full() {
            self.stats.hit();
            return Ok(all);
        }

        let _bulk = self.bulk.lock();
        if let Some(all) = self.all.load_full() {
            self.stats.hit();
            return Ok(all);
        }

        self.stats.miss();
        let generation = self.bulk_generation.load(Ordering::Acquire);
        *self.bulk_watch.lock() = Some(BulkWatch::default());
        let rows = match self.fetch(None) {
            Ok(rows) => rows,
            Err(e) => {
                self.bulk_watch.lock().take();
                return Err(e);
            }
        };
        let row_count = rows.len();

        let mut grouped: HashMap<K, Vec<R>> = HashMap::new();
        for row in rows {
            grouped.entry(row.key()).or_default().push(row);
        }
        let all: Arc<KeyedGroups<K, R>> = Arc::new(
            grouped
                .into_iter()
                .map(|(key, rows)| (key, Arc::new(rows)))
                .collect(),
        );

        {
            let mut entries = self.entries.write();
            let watch = self.bulk_watch.lock().take().unwrap_or_default();
            if watch.everything {
                log::debug!(
                    "Table '{}' cleared during bulk load; result not cached",
                    R::TABLE
                );
                return Ok(all);
            }

            // Keys invalidated mid-fetch keep whatever they hold now; the bulk
            // result may predate the change. Sentinels of keys the bulk load
            // did not cover stay in place.
            entries.retain(|key, slot| {
                watch.keys.contains(key)
                    || (matches!(slot, KeySlot::Fetching(_)) && !all.contains_key(key))
            });
            for (key, rows) in all.iter() {
                if !watch.keys.contains(key) {
                    entries.insert(key.clone(), KeySlot::Known(Arc::clone(rows)));
                }
            }

            if watch.is_clean() && self.bulk_generation.load(Ordering::Acquire) == generation {
                self.all.store(Some(Arc::clone(&all)));
            } else {
                log::debug!(
                    "Table '{}' changed during bulk load; not marking all loaded",
                    R::TABLE
                );
            }
        }

        log::info!(
            "Loaded all of '{}': {} rows under {} keys",
            R::TABLE,
            row_count,
            all.len()
        );
        Ok(all)
    }

    /// Forget known keys, or everything when `keys` is `None`
    ///
    /// Keys with a fetch in progress keep their sentinel; that fetch's result
    /// is not cached when it lands. Fetches of other keys are unaffected.
    pub fn invalidate_keys(&self, keys: Option<&[K]>) {
        let mut entries = self.entries.write();
        let mut watch = self.bulk_watch.lock();
        match keys {
            None => {
                entries.retain(|_, slot| match slot {
                    KeySlot::Fetching(flight) => {
                        flight.invalidate();
                        true
                    }
                    KeySlot::Known(_) => false,
                });
                if let Some(watch) = watch.as_mut() {
                    watch.everything = true;
                }
                self.bulk_generation.fetch_add(1, Ordering::AcqRel);
                self.all.store(None);
                log::debug!("Cleared keyed cache of '{}'", R::TABLE);
            }
            Some(keys) => {
                let mut removed = 0;
                let mut in_flight = 0;
                for key in keys {
                    match entries.get(key) {
                        Some(KeySlot::Known(_)) => {
                            entries.remove(key);
                            removed += 1;
                        }
                        Some(KeySlot::Fetching(flight)) => {
                            flight.invalidate();
                            in_flight += 1;
                        }
                        None => {}
                    }
                    if let Some(watch) = watch.as_mut() {
                        watch.keys.insert(key.clone());
                    }
                }
                if removed > 0 {
                    self.bulk_generation.fetch_add(1, Ordering::AcqRel);
                    self.all.store(None);
                }
                log::debug!(
                    "Invalidated {} keys of '{}' ({} in flight)",
                    removed,
                    R::TABLE,
                    in_flight
                );
            }
        }
    }

    /// New rows may exist under keys not seen yet
    ///
    /// Known keys stay valid; only the all-loaded state is dropped.
    pub fn handle_row_inserted_notice(&self) {
        let _entries = self.entries.write();
        self.bulk_generation.fetch_add(1, Ordering::AcqRel);
        self.all.store(None);
    }

    pub fn is_all_loaded(&self) -> bool {
        self.all.load().is_some()
    }

    pub fn is_known(&self, key: &K) -> bool {
        matches!(self.entries.read().get(key), Some(KeySlot::Known(_)))
    }

    /// Number of known keys
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| matches!(slot, KeySlot::Known(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn lookup(all: &KeyedGroups<K, R>, key: &K) -> Arc<Vec<R>> {
        all.get(key).cloned().unwrap_or_default()
    }

    fn fetch(&self, predicate: Option<&FilterExpr>) -> CacheResult<Vec<R>> {
        match predicate {
            Some(predicate) => log::debug!("Fetching '{}' where {}", R::TABLE, predicate),
            None => log::debug!("Fetching all of '{}'", R::TABLE),
        }
        let rows = self
            .source
            .fetch(predicate)
            .map_err(|e| CacheError::fetch(R::TABLE, e))?;
        self.stats.fetched(rows.len());
        Ok(rows)
    }
}

impl<K: CacheKey, R: KeyedBy<K>> Invalidate for KeyedCache<K, R> {
    fn invalidate(&self, keys: Option<&[FilterValue]>) {
        match keys {
            Some(values) => self.invalidate_keys(Some(&decode_keys::<K>(values))),
            None => self.invalidate_keys(None),
        }
    }

    fn handle_row_inserted_notice(&self) -> CacheResult<()> {
        KeyedCache::handle_row_inserted_notice(self);
        Ok(())
    }
}
