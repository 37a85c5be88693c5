// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! What a table needs to build itself

use crate::cache::{DeferredScheduler, TableCacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::row::CachedRow;
use crate::source::RowSource;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Row sources by row type
///
/// Each entry holds an `Arc<dyn RowSource<R>>` erased to `Any`.
#[derive(Default)]
pub(crate) struct SourceMap {
    sources: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SourceMap {
    pub fn insert<R: CachedRow>(&self, source: Arc<dyn RowSource<R>>) {
        self.sources.write().insert(TypeId::of::<R>(), Arc::new(source));
    }

    pub fn get<R: CachedRow>(&self) -> CacheResult<Arc<dyn RowSource<R>>> {
        self.sources
            .read()
            .get(&TypeId::of::<R>())
            .and_then(|erased| erased.downcast_ref::<Arc<dyn RowSource<R>>>())
            .cloned()
            .ok_or(CacheError::SourceNotRegistered(R::TABLE))
    }

    pub fn contains<R: CachedRow>(&self) -> bool {
        self.sources.read().contains_key(&TypeId::of::<R>())
    }
}

/// Borrowed view of a registry handed to [`CachedTable::build`]
///
/// [`CachedTable::build`]: super::CachedTable::build
pub struct BuildContext<'a> {
    pub(crate) config: &'a TableCacheConfig,
    pub(crate) scheduler: &'a Arc<DeferredScheduler>,
    pub(crate) sources: &'a SourceMap,
}

impl BuildContext<'_> {
    pub fn config(&self) -> &TableCacheConfig {
        self.config
    }

    pub fn scheduler(&self) -> Arc<DeferredScheduler> {
        Arc::clone(self.scheduler)
    }

    /// The row source registered for `R`
    pub fn source<R: CachedRow>(&self) -> CacheResult<Arc<dyn RowSource<R>>> {
        self.sources.get::<R>()
    }
}
