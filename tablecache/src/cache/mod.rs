// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lazily materialized table caches
//!
//! This module provides three cache shapes over a [`RowSource`](crate::source::RowSource):
//! - [`SiblingGroupCache`]: rows organised in sibling groups, loaded a group at
//!   a time and escalatable to a fully materialized, lock-free snapshot
//! - [`KeyedCache`]: per-key row lists fetched on demand, one fetch per key
//! - [`LookupTable`]: a whole table loaded at construction

pub mod cache_config;
pub mod deferred;
pub mod invalidation;
pub mod keyed_cache;
pub mod lookup_table;
pub mod sibling_cache;

pub use cache_config::TableCacheConfig;
pub use deferred::{DeferredScheduler, DeferredTask};
pub use invalidation::Invalidate;
pub use keyed_cache::{KeyedCache, KeyedGroups};
pub use lookup_table::LookupTable;
pub use sibling_cache::{SiblingGroupCache, Snapshot};

use crate::source::FilterValue;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Key type of a [`KeyedCache`] or [`LookupTable`]
///
/// Keys travel through change notifications as [`FilterValue`]s, so they must
/// convert both ways.
pub trait CacheKey: Debug + Clone + Eq + Hash + Send + Sync + 'static {
    fn to_filter_value(&self) -> FilterValue;

    fn from_filter_value(value: &FilterValue) -> Option<Self>;
}

impl CacheKey for i64 {
    fn to_filter_value(&self) -> FilterValue {
        FilterValue::Int(*self)
    }

    fn from_filter_value(value: &FilterValue) -> Option<Self> {
        match value {
            FilterValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl CacheKey for i32 {
    fn to_filter_value(&self) -> FilterValue {
        FilterValue::Int(i64::from(*self))
    }

    fn from_filter_value(value: &FilterValue) -> Option<Self> {
        match value {
            FilterValue::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl CacheKey for u32 {
    fn to_filter_value(&self) -> FilterValue {
        FilterValue::Int(i64::from(*self))
    }

    fn from_filter_value(value: &FilterValue) -> Option<Self> {
        match value {
            FilterValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl CacheKey for String {
    fn to_filter_value(&self) -> FilterValue {
        FilterValue::Text(self.clone())
    }

    fn from_filter_value(value: &FilterValue) -> Option<Self> {
        match value {
            FilterValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl CacheKey for Uuid {
    fn to_filter_value(&self) -> FilterValue {
        FilterValue::Uuid(*self)
    }

    fn from_filter_value(value: &FilterValue) -> Option<Self> {
        match value {
            FilterValue::Uuid(v) => Some(*v),
            FilterValue::Text(v) => Uuid::parse_str(v).ok(),
            FilterValue::Int(_) => None,
        }
    }
}

/// Decode the keys of an invalidation notice, skipping values of the wrong type
pub(crate) fn decode_keys<K: CacheKey>(values: &[FilterValue]) -> Vec<K> {
    values.iter().filter_map(K::from_filter_value).collect()
}

/// Point-in-time counters of a single cache
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub rows_fetched: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    rows_fetched: AtomicU64,
}

impl StatsRecorder {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetched(&self, rows: usize) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
        }
    }
}
