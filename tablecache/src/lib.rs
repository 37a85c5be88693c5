// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! tablecache - concurrent lazy-loading table caches
//!
//! tablecache mirrors slices of a remote relational store in memory so that
//! latency-sensitive code never waits on the network for rows it has already
//! seen, while following the store's change notifications.
//!
//! # Features
//!
//! - **Sibling-group caching**: whole groups of related rows are loaded
//!   together, escalating to a lock-free snapshot of the full table
//! - **Single-flight keyed caching**: one remote fetch per key, with unrelated
//!   keys fetched in parallel
//! - **Type-indexed registry**: one cache per table type, built on first access
//!   and rebuilt on demand
//! - **Change notifications**: reload, partial invalidation and insert notices
//!   routed to the affected caches
//!
//! # Usage
//!
//! ```rust,ignore
//! use tablecache::{TableRegistry, TableCacheConfig};
//!
//! let registry = TableRegistry::new(TableCacheConfig::default())?;
//! registry.register_source::<Task>(Arc::new(task_source));
//!
//! let tasks = registry.siblings::<Task>()?;
//! let siblings = tasks.get_by_group(GroupKey::pair(project_id, owner_id))?;
//! ```

pub mod cache;
pub mod error;
pub mod notify;
pub mod registry;
pub mod row;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    CacheKey, CacheStats, DeferredScheduler, DeferredTask, Invalidate, KeyedCache, LookupTable,
    SiblingGroupCache, Snapshot, TableCacheConfig,
};
pub use error::{CacheError, CacheResult, FetchError, FetchResult};
pub use notify::{ChangeKind, ChangeListener, ChangeNotice, NotificationBus, SubscriptionId};
pub use registry::{BlockingSection, BuildContext, CachedTable, TableRegistry};
pub use row::{CachedRow, GroupKey, KeyedBy, ResourceId, RowId, SiblingRow};
pub use source::{ExclusionSet, FilterExpr, FilterValue, Filterable, MemoryRowSource, RowSource};

/// tablecache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// tablecache crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
