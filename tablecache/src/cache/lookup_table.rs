// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Small reference tables loaded whole

use super::{CacheKey, CacheStats, StatsRecorder};
use crate::error::{CacheError, CacheResult};
use crate::row::KeyedBy;
use crate::source::RowSource;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A table fully loaded when constructed and never refreshed in place
///
/// Rows are unique by key; if the source returns duplicates the row with the
/// highest id wins. A stale table is replaced as a whole by the registry.
pub struct LookupTable<K: CacheKey, R: KeyedBy<K>> {
    rows: HashMap<K, Arc<R>>,
    stats: StatsRecorder,
    _row: PhantomData<fn() -> R>,
}

impl<K: CacheKey, R: KeyedBy<K>> LookupTable<K, R> {
    pub fn load(source: &dyn RowSource<R>) -> CacheResult<Self> {
        let mut fetched = source
            .fetch(None)
            .map_err(|e| CacheError::fetch(R::TABLE, e))?;
        fetched.sort_by_key(|row| row.id());

        let stats = StatsRecorder::default();
        stats.fetched(fetched.len());

        let rows: HashMap<K, Arc<R>> = fetched
            .into_iter()
            .map(|row| (row.key(), Arc::new(row)))
            .collect();
        log::debug!("Loaded lookup table '{}' with {} keys", R::TABLE, rows.len());

        Ok(Self {
            rows,
            stats,
            _row: PhantomData,
        })
    }

    pub fn get(&self, key: &K) -> Option<Arc<R>> {
        let row = self.rows.get(key).cloned();
        if row.is_some() {
            self.stats.hit();
        } else {
            self.stats.miss();
        }
        row
    }

    pub fn rows(&self) -> impl Iterator<Item = &Arc<R>> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
