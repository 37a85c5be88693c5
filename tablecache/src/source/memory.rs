// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory row source implementation for testing

use super::filter::{FilterExpr, Filterable};
use super::RowSource;
use crate::error::{FetchError, FetchResult};
use crate::row::RowId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

/// In-memory row source for testing
///
/// Evaluates every [`FilterExpr`] against a local table, records each fetch,
/// and can be told to fail or to respond slowly.
pub struct MemoryRowSource<R> {
    rows: RwLock<BTreeMap<RowId, R>>,
    fetch_log: Mutex<Vec<Option<FilterExpr>>>,
    failure: RwLock<Option<FetchError>>,
    latency: RwLock<Duration>,
}

impl<R: Filterable> MemoryRowSource<R> {
    /// Create an empty source
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            fetch_log: Mutex::new(Vec::new()),
            failure: RwLock::new(None),
            latency: RwLock::new(Duration::ZERO),
        }
    }

    pub fn with_rows<I: IntoIterator<Item = R>>(rows: I) -> Self {
        let source = Self::new();
        {
            let mut table = source.rows.write();
            for row in rows {
                table.insert(row.id(), row);
            }
        }
        source
    }

    /// Insert or replace a row, returning the previous version
    pub fn insert(&self, row: R) -> Option<R> {
        self.rows.write().insert(row.id(), row)
    }

    pub fn remove(&self, id: RowId) -> Option<R> {
        self.rows.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of fetches issued, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetch_log.lock().len()
    }

    /// Predicates of every fetch, oldest first
    pub fn fetch_log(&self) -> Vec<Option<FilterExpr>> {
        self.fetch_log.lock().clone()
    }

    pub fn clear_fetch_log(&self) {
        self.fetch_log.lock().clear();
    }

    /// Make every following fetch fail with `failure`, or succeed again with `None`
    pub fn fail_with(&self, failure: Option<FetchError>) {
        *self.failure.write() = failure;
    }

    /// Delay every following fetch
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }
}

impl<R: Filterable> Default for MemoryRowSource<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Filterable> RowSource<R> for MemoryRowSource<R> {
    fn fetch(&self, predicate: Option<&FilterExpr>) -> FetchResult<Vec<R>> {
        self.fetch_log.lock().push(predicate.cloned());

        let latency = *self.latency.read();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        if let Some(failure) = self.failure.read().clone() {
            return Err(failure);
        }

        let rows = self.rows.read();
        let Some(predicate) = predicate else {
            return Ok(rows.values().cloned().collect());
        };

        let group_of = |id: RowId| rows.get(&id).and_then(|row| row.group_key());
        Ok(rows
            .values()
            .filter(|row| predicate.matches(*row, &group_of))
            .cloned()
            .collect())
    }
}
