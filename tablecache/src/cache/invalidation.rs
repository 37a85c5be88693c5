// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fine-grained invalidation contract
//!
//! Caches implementing [`Invalidate`] absorb change notifications themselves.
//! Tables that don't are dropped from their registry slot and rebuilt on the
//! next access instead.

use crate::error::CacheResult;
use crate::source::FilterValue;

pub trait Invalidate: Send + Sync {
    /// Forget cached rows
    ///
    /// `None` addresses the whole table. `Some(keys)` names the affected
    /// entries: row ids for a sibling-group cache, cache keys for a keyed
    /// cache.
    fn invalidate(&self, keys: Option<&[FilterValue]>);

    /// Rows may have been inserted beyond what the cache has seen
    fn handle_row_inserted_notice(&self) -> CacheResult<()>;
}
