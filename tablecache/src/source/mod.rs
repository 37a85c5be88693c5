// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Row sources
//!
//! A row source executes a filtered fetch against the remote store. Caches
//! depend on two properties only: the result is a finite row sequence, and
//! fetching the same predicate twice is harmless because caches merge by row
//! id rather than appending.
//!
//! ```text
//! SiblingGroupCache / KeyedCache / LookupTable
//!     ↓  FilterExpr
//! RowSource (retries, timeouts, query syntax)
//!     ↓
//! Remote store
//! ```

pub mod filter;
pub mod memory;

pub use filter::{ExclusionSet, FilterExpr, FilterValue, Filterable};
pub use memory::MemoryRowSource;

use crate::error::FetchResult;

/// Fetches rows of type `R` matching an optional predicate
///
/// `None` means every row of the table.
pub trait RowSource<R>: Send + Sync {
    fn fetch(&self, predicate: Option<&FilterExpr>) -> FetchResult<Vec<R>>;
}

impl<R, F> RowSource<R> for F
where
    F: Fn(Option<&FilterExpr>) -> FetchResult<Vec<R>> + Send + Sync,
{
    fn fetch(&self, predicate: Option<&FilterExpr>) -> FetchResult<Vec<R>> {
        self(predicate)
    }
}
