// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Table registry implementation
//!
//! The registry owns one slot per table type, allocated on first access and
//! kept for the life of the registry. Slots are found through a type index
//! under a shared lock; the exclusive side is taken only to grow the slot
//! array. Construction itself is serialized per slot, never registry-wide.

use super::context::{BuildContext, SourceMap};
use super::slot::TableSlot;
use super::traits::CachedTable;
use crate::cache::{
    CacheKey, DeferredScheduler, KeyedCache, LookupTable, SiblingGroupCache, TableCacheConfig,
};
use crate::error::{CacheError, CacheResult};
use crate::notify::{ChangeKind, ChangeListener, ChangeNotice, NotificationBus, SubscriptionId};
use crate::row::{CachedRow, KeyedBy, ResourceId, SiblingRow};
use crate::source::RowSource;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Process-wide registry, built with the default configuration on first use
static GLOBAL_REGISTRY: Lazy<Arc<TableRegistry>> = Lazy::new(|| {
    Arc::new(TableRegistry::with_scheduler(
        TableCacheConfig::default(),
        DeferredScheduler::global(),
    ))
});

#[derive(Default)]
struct SlotTable {
    index: HashMap<TypeId, usize>,
    slots: Vec<Arc<TableSlot>>,
}

impl SlotTable {
    fn lookup(&self, type_id: TypeId) -> Option<Arc<TableSlot>> {
        self.index
            .get(&type_id)
            .map(|position| Arc::clone(&self.slots[*position]))
    }
}

/// Exclusive access to a registry, released on drop
///
/// No table can be constructed or fetched through the registry while a
/// section is held, including from the thread holding it.
#[must_use = "the section ends when dropped"]
pub struct BlockingSection<'a> {
    _gate: RwLockWriteGuard<'a, ()>,
}

/// Type-indexed registry of lazily constructed table caches
pub struct TableRegistry {
    config: TableCacheConfig,
    slots: RwLock<SlotTable>,
    sources: SourceMap,
    /// Shared by every table access, exclusive for blocking sections
    gate: RwLock<()>,
    scheduler: Arc<DeferredScheduler>,
}

impl TableRegistry {
    /// Create a registry whose sibling caches use the process-wide
    /// deferred scheduler
    pub fn new(config: TableCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::with_scheduler(config, DeferredScheduler::global()))
    }

    pub(crate) fn with_scheduler(
        config: TableCacheConfig,
        scheduler: Arc<DeferredScheduler>,
    ) -> Self {
        Self {
            config,
            slots: RwLock::new(SlotTable::default()),
            sources: SourceMap::default(),
            gate: RwLock::new(()),
            scheduler,
        }
    }

    pub fn global() -> Arc<TableRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn config(&self) -> &TableCacheConfig {
        &self.config
    }

    /// Register the source tables of row type `R` fetch from
    ///
    /// Tables already built over a previous source are dropped and rebuilt
    /// from the new one on next access.
    pub fn register_source<R: CachedRow>(&self, source: Arc<dyn RowSource<R>>) {
        let replacing = self.sources.contains::<R>();
        self.sources.insert(source);
        if replacing {
            for slot in self.slots_of(ResourceId::of::<R>()) {
                slot.clear();
            }
        }
        log::info!(
            "{} row source for table '{}'",
            if replacing { "Replaced" } else { "Registered" },
            R::TABLE
        );
    }

    /// The table of type `T`, constructing it on first access
    ///
    /// Concurrent first accesses share a single construction. A construction
    /// failure is returned to the caller that ran it and the next access
    /// retries.
    pub fn get_or_create<T: CachedTable>(&self) -> CacheResult<Arc<T>> {
        let _access = self.gate.read_recursive();
        let slot = self.slot_for::<T>();
        let object = slot.get(&self.build_context())?;
        match object.any.downcast::<T>() {
            Ok(table) => Ok(table),
            Err(_) => unreachable!("slot of '{}' holds a foreign table type", slot.table),
        }
    }

    pub fn siblings<R: SiblingRow>(&self) -> CacheResult<Arc<SiblingGroupCache<R>>> {
        self.get_or_create::<SiblingGroupCache<R>>()
    }

    pub fn keyed<K: CacheKey, R: KeyedBy<K>>(&self) -> CacheResult<Arc<KeyedCache<K, R>>> {
        self.get_or_create::<KeyedCache<K, R>>()
    }

    pub fn lookup<K: CacheKey, R: KeyedBy<K>>(&self) -> CacheResult<Arc<LookupTable<K, R>>> {
        self.get_or_create::<LookupTable<K, R>>()
    }

    /// Invalidate every table over `resource`
    ///
    /// Tables supporting fine-grained invalidation forget their rows in
    /// place; others are dropped from their slot. A table still under
    /// construction is rebuilt on the access after it lands.
    pub fn reload_on_next_access(&self, resource: ResourceId) {
        let slots = self.slots_of(resource);
        for slot in &slots {
            slot.reload_on_next_access();
        }
        log::debug!(
            "Marked {} tables of '{}' for reload on next access",
            slots.len(),
            resource
        );
    }

    /// Rebuild every table over `resource` before returning
    pub fn reload_now(&self, resource: ResourceId) -> CacheResult<()> {
        self.reload_slots(&self.slots_of(resource))
    }

    /// Reload every table
    ///
    /// Without `immediate` this only invalidates, as
    /// [`reload_on_next_access`](Self::reload_on_next_access) does. With it,
    /// all tables are dropped and rebuilt in full on a worker pool, priority
    /// tables first. Every table is attempted; the first failure in
    /// priority order is returned.
    pub fn load_all(&self, immediate: bool) -> CacheResult<()> {
        let slots = self.all_slots();
        if !immediate {
            for slot in &slots {
                slot.reload_on_next_access();
            }
            log::info!("Marked all {} tables for reload on next access", slots.len());
            return Ok(());
        }

        let _access = self.gate.read_recursive();
        for slot in &slots {
            slot.clear();
        }

        let mut ordered = slots;
        ordered.sort_by(|a, b| {
            (self.config.priority_of(a.table), a.table)
                .cmp(&(self.config.priority_of(b.table), b.table))
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.load_parallelism)
            .thread_name(|index| format!("tablecache-load-{}", index))
            .build()?;

        let ctx = self.build_context();
        let failures: Mutex<Vec<(usize, CacheError)>> = Mutex::new(Vec::new());
        pool.scope_fifo(|scope| {
            for (position, slot) in ordered.iter().enumerate() {
                let ctx = &ctx;
                let failures = &failures;
                scope.spawn_fifo(move |_| {
                    let loaded = slot.get(ctx).and_then(|object| object.table.preload());
                    if let Err(e) = loaded {
                        log::warn!("Loading table '{}' failed: {}", slot.table, e);
                        failures.lock().push((position, e));
                    }
                });
            }
        });

        let failures = failures.into_inner();
        log::info!(
            "Loaded {} tables, {} failed",
            ordered.len() - failures.len(),
            failures.len()
        );
        match failures.into_iter().min_by_key(|(position, _)| *position) {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Exclude all table access until the returned section is dropped or
    /// passed to [`end_blocking`](Self::end_blocking)
    ///
    /// Waits for accesses in progress, including constructions, to finish.
    pub fn start_blocking(&self) -> BlockingSection<'_> {
        let gate = self.gate.write();
        log::info!("Table registry blocked");
        BlockingSection { _gate: gate }
    }

    pub fn end_blocking(&self, section: BlockingSection<'_>) {
        drop(section);
        log::info!("Table registry unblocked");
    }

    /// Whether a blocking section is held, waiting at most `timeout` for it
    /// to end
    pub fn is_blocking(&self, timeout: Duration) -> bool {
        self.gate.try_read_recursive_for(timeout).is_none()
    }

    /// True once a constructed table of type `T` occupies its slot
    pub fn is_loaded<T: CachedTable>(&self) -> bool {
        self.slots
            .read()
            .lookup(TypeId::of::<T>())
            .map_or(false, |slot| slot.is_loaded())
    }

    /// True if any table over `resource` is constructed
    pub fn is_resource_loaded(&self, resource: ResourceId) -> bool {
        self.slots_of(resource).iter().any(|slot| slot.is_loaded())
    }

    /// Names of every table that has been accessed, sorted
    pub fn table_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.slots.read().slots.iter().map(|slot| slot.table).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Route a change notice to the tables it addresses
    ///
    /// A global notice addresses every constructed table. All addressed
    /// tables are processed; the first failure is returned.
    pub fn apply(&self, notice: &ChangeNotice) -> CacheResult<()> {
        let slots = match notice.resource {
            Some(resource) => self.slots_of(resource),
            None => self
                .all_slots()
                .into_iter()
                .filter(|slot| slot.is_loaded())
                .collect(),
        };
        log::debug!("Applying {} to {} tables", notice, slots.len());

        match &notice.kind {
            ChangeKind::ReloadTable => self.reload_slots(&slots),
            ChangeKind::ReloadTableOnNextAccess => {
                for slot in &slots {
                    slot.reload_on_next_access();
                }
                Ok(())
            }
            ChangeKind::InvalidateParts(keys) => {
                for slot in &slots {
                    slot.with_invalidation(|invalidation| {
                        invalidation.invalidate(Some(keys.as_slice()));
                        Ok(())
                    })?;
                }
                Ok(())
            }
            ChangeKind::NoticeRowInsert => {
                let mut first_error = None;
                for slot in &slots {
                    if let Err(e) =
                        slot.with_invalidation(|invalidation| invalidation.handle_row_inserted_notice())
                    {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }

    /// Subscribe this registry to `bus`
    ///
    /// The bus holds the registry weakly; dropping the registry ends the
    /// subscription.
    pub fn attach(self: &Arc<Self>, bus: &NotificationBus) -> SubscriptionId {
        let listener: Weak<dyn ChangeListener> = Arc::downgrade(self) as Weak<TableRegistry>;
        bus.subscribe(listener)
    }

    fn build_context(&self) -> BuildContext<'_> {
        BuildContext {
            config: &self.config,
            scheduler: &self.scheduler,
            sources: &self.sources,
        }
    }

    fn slot_for<T: CachedTable>(&self) -> Arc<TableSlot> {
        let type_id = TypeId::of::<T>();
        if let Some(slot) = self.slots.read().lookup(type_id) {
            return slot;
        }

        let mut slots = self.slots.write();
        if let Some(slot) = slots.lookup(type_id) {
            return slot;
        }
        let slot = Arc::new(TableSlot::new::<T>());
        let position = slots.slots.len();
        slots.slots.push(Arc::clone(&slot));
        slots.index.insert(type_id, position);
        log::debug!("Allocated slot {} for table '{}'", position, slot.table);
        slot
    }

    fn slots_of(&self, resource: ResourceId) -> Vec<Arc<TableSlot>> {
        self.slots
            .read()
            .slots
            .iter()
            .filter(|slot| slot.resource == resource)
            .cloned()
            .collect()
    }

    fn all_slots(&self) -> Vec<Arc<TableSlot>> {
        self.slots.read().slots.clone()
    }

    fn reload_slots(&self, slots: &[Arc<TableSlot>]) -> CacheResult<()> {
        let _access = self.gate.read_recursive();
        let ctx = self.build_context();
        for slot in slots {
            slot.clear();
            slot.get(&ctx)?.table.preload()?;
            log::info!("Reloaded table '{}'", slot.table);
        }
        Ok(())
    }
}

impl ChangeListener for TableRegistry {
    fn on_change(&self, notice: &ChangeNotice) {
        if let Err(e) = self.apply(notice) {
            log::warn!("Failed to apply {}: {}", notice, e);
        }
    }
}
