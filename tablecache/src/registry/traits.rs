// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Table trait definition
//!
//! Every cache the registry can hold implements [`CachedTable`]. The static
//! half (`build`, `table_name`, `resource_id`) is used when a slot is first
//! allocated and whenever it is rebuilt; the object-safe half lets the
//! registry drive a constructed table without knowing its concrete type.

use super::context::BuildContext;
use crate::cache::{CacheKey, Invalidate, KeyedCache, LookupTable, SiblingGroupCache};
use crate::error::CacheResult;
use crate::row::{KeyedBy, ResourceId, SiblingRow};
use std::sync::Arc;

pub trait CachedTable: Send + Sync + 'static {
    /// Construct the table, fetching whatever it loads eagerly
    fn build(ctx: &BuildContext<'_>) -> CacheResult<Arc<Self>>
    where
        Self: Sized;

    fn table_name() -> &'static str
    where
        Self: Sized;

    /// Resource whose change notices reach this table
    fn resource_id() -> ResourceId
    where
        Self: Sized;

    /// Fine-grained invalidation, if the table supports it
    ///
    /// Tables returning `None` are dropped from their slot on any change.
    fn invalidation(&self) -> Option<&dyn Invalidate> {
        None
    }

    /// Load everything the table can hold, used by eager reloads
    fn preload(&self) -> CacheResult<()> {
        Ok(())
    }
}

impl<R: SiblingRow> CachedTable for SiblingGroupCache<R> {
    fn build(ctx: &BuildContext<'_>) -> CacheResult<Arc<Self>> {
        Ok(SiblingGroupCache::new(
            ctx.source::<R>()?,
            ctx.config(),
            ctx.scheduler(),
        ))
    }

    fn table_name() -> &'static str {
        R::TABLE
    }

    fn resource_id() -> ResourceId {
        ResourceId::of::<R>()
    }

    fn invalidation(&self) -> Option<&dyn Invalidate> {
        Some(self)
    }

    fn preload(&self) -> CacheResult<()> {
        self.force_full_materialization()
    }
}

impl<K: CacheKey, R: KeyedBy<K>> CachedTable for KeyedCache<K, R> {
    fn build(ctx: &BuildContext<'_>) -> CacheResult<Arc<Self>> {
        Ok(Arc::new(KeyedCache::new(ctx.source::<R>()?)))
    }

    fn table_name() -> &'static str {
        R::TABLE
    }

    fn resource_id() -> ResourceId {
        ResourceId::of::<R>()
    }

    fn invalidation(&self) -> Option<&dyn Invalidate> {
        Some(self)
    }

    fn preload(&self) -> CacheResult<()> {
        self.get_all().map(|_| ())
    }
}

impl<K: CacheKey, R: KeyedBy<K>> CachedTable for LookupTable<K, R> {
    fn build(ctx: &BuildContext<'_>) -> CacheResult<Arc<Self>> {
        let source = ctx.source::<R>()?;
        Ok(Arc::new(LookupTable::load(source.as_ref())?))
    }

    fn table_name() -> &'static str {
        R::TABLE
    }

    fn resource_id() -> ResourceId {
        ResourceId::of::<R>()
    }
}
