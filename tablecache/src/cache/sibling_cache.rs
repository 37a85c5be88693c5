// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sibling-group cache
//!
//! Caches a row type whose natural access pattern is "every row under a given
//! group" while still answering point lookups by row id. The cache never holds
//! part of a group: whenever one row of a group is cached, all its siblings
//! are too.
//!
//! # States
//!
//! ```text
//! empty ──group fetch──▶ partial ──force_full_materialization──▶ complete
//!   ▲                       ▲                                      │
//!   └──invalidate(all)──────┴────────invalidate(keys) (demote)─────┘
//! ```
//!
//! While partial, rows live in a lock-guarded `PartialState`. Once complete,
//! rows live in an immutable [`Snapshot`] behind an atomically swapped pointer
//! and reads take no lock at all. Writers in the complete state build a new
//! snapshot and swap it in; a reader holding the previous snapshot keeps
//! iterating a consistent view. Snapshot maps are `im::HashMap`s, so the copy
//! made for a small update shares everything it does not touch.

use super::deferred::{DeferredScheduler, DeferredTask};
use super::invalidation::Invalidate;
use super::{decode_keys, CacheStats, StatsRecorder, TableCacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::row::{GroupKey, RowId, SiblingRow};
use crate::source::{ExclusionSet, FilterExpr, FilterValue, RowSource};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Immutable view of a fully materialized table
#[derive(Debug)]
pub struct Snapshot<R> {
    rows: im::HashMap<RowId, Arc<R>>,
    groups: im::HashMap<GroupKey, Vec<RowId>>,
    max_id: Option<RowId>,
}

// O(1): both maps are persistent
impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            groups: self.groups.clone(),
            max_id: self.max_id,
        }
    }
}

impl<R: SiblingRow> Snapshot<R> {
    fn empty() -> Self {
        Self {
            rows: im::HashMap::new(),
            groups: im::HashMap::new(),
            max_id: None,
        }
    }

    fn build<I: IntoIterator<Item = Arc<R>>>(rows: I) -> Self {
        let mut snapshot = Self::empty();
        for row in rows {
            snapshot.insert(row);
        }
        snapshot
    }

    fn insert(&mut self, row: Arc<R>) {
        let id = row.id();
        let group = row.group();
        if let Some(previous) = self.rows.insert(id, Arc::clone(&row)) {
            if let Some(members) = self.groups.get_mut(&previous.group()) {
                members.retain(|member| *member != id);
            }
        }
        self.groups.entry(group).or_insert_with(Vec::new).push(id);
        self.max_id = self.max_id.max(Some(id));
    }

    pub fn get(&self, id: RowId) -> Option<Arc<R>> {
        self.rows.get(&id).cloned()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Rows of one group, in insertion order
    pub fn group(&self, group: &GroupKey) -> Vec<Arc<R>> {
        self.groups
            .get(group)
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<R>> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn max_id(&self) -> Option<RowId> {
        self.max_id
    }
}

/// Rows of the groups known so far
///
/// A group is known once it has been fetched as a whole; a known group may be
/// empty.
struct PartialState<R> {
    rows: HashMap<RowId, Arc<R>>,
    groups: HashMap<GroupKey, Vec<RowId>>,
    max_id: Option<RowId>,
}

impl<R: SiblingRow> PartialState<R> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            groups: HashMap::new(),
            max_id: None,
        }
    }

    /// Partial state holding every group of `snapshot` except `dropped`
    fn from_snapshot(snapshot: &Snapshot<R>, dropped: &HashSet<GroupKey>) -> Self {
        let mut state = Self::new();
        for (group, ids) in &snapshot.groups {
            if dropped.contains(group) {
                continue;
            }
            for id in ids {
                if let Some(row) = snapshot.rows.get(id) {
                    state.rows.insert(*id, Arc::clone(row));
                }
            }
            state.groups.insert(*group, ids.clone());
        }
        state.max_id = snapshot.max_id;
        state
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.groups.clear();
        self.max_id = None;
    }

    fn group(&self, group: &GroupKey) -> Option<Vec<Arc<R>>> {
        self.groups.get(group).map(|ids| {
            ids.iter()
                .filter_map(|id| self.rows.get(id).cloned())
                .collect()
        })
    }

    fn knows_group(&self, group: &GroupKey) -> bool {
        self.groups.contains_key(group)
    }

    fn insert(&mut self, row: Arc<R>) {
        let id = row.id();
        if let Some(previous) = self.rows.insert(id, Arc::clone(&row)) {
            detach(&mut self.groups, previous.group(), id);
        }
        self.groups.entry(row.group()).or_default().push(id);
        self.max_id = self.max_id.max(Some(id));
    }

    /// Replace a group wholesale with freshly fetched members
    fn merge_group(&mut self, group: GroupKey, rows: Vec<R>) {
        if let Some(stale) = self.groups.insert(group, Vec::new()) {
            for id in stale {
                self.rows.remove(&id);
            }
        }
        for row in rows {
            self.insert(Arc::new(row));
        }
    }

    /// Forget every group containing one of `ids`
    fn remove_groups_of(&mut self, ids: &[RowId]) -> usize {
        let doomed: HashSet<GroupKey> = ids
            .iter()
            .filter_map(|id| self.rows.get(id).map(|row| row.group()))
            .collect();
        for group in &doomed {
            if let Some(members) = self.groups.remove(group) {
                for id in members {
                    self.rows.remove(&id);
                }
            }
        }
        doomed.len()
    }
}

fn detach(groups: &mut HashMap<GroupKey, Vec<RowId>>, group: GroupKey, id: RowId) {
    if let Some(members) = groups.get_mut(&group) {
        members.retain(|member| *member != id);
    }
}

fn split_by_group<R: SiblingRow>(rows: Vec<R>) -> HashMap<GroupKey, Vec<R>> {
    let mut groups: HashMap<GroupKey, Vec<R>> = HashMap::new();
    for row in rows {
        groups.entry(row.group()).or_default().push(row);
    }
    groups
}

/// Cache of sibling groups over a row source
pub struct SiblingGroupCache<R: SiblingRow> {
    source: Arc<dyn RowSource<R>>,
    state: RwLock<PartialState<R>>,
    /// Set once `snapshot` holds every row; readers then skip `state`
    complete: AtomicBool,
    snapshot: ArcSwap<Snapshot<R>>,
    scheduler: Arc<DeferredScheduler>,
    rematerialize_delay: Duration,
    compact_exclusions: bool,
    stats: StatsRecorder,
    self_ref: Weak<Self>,
}

impl<R: SiblingRow> SiblingGroupCache<R> {
    pub fn new(
        source: Arc<dyn RowSource<R>>,
        config: &TableCacheConfig,
        scheduler: Arc<DeferredScheduler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            source,
            state: RwLock::new(PartialState::new()),
            complete: AtomicBool::new(false),
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
            scheduler,
            rematerialize_delay: config.rematerialize_delay,
            compact_exclusions: config.compact_exclusions,
            stats: StatsRecorder::default(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn is_fully_materialized(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// The current snapshot, if the cache is fully materialized
    pub fn snapshot(&self) -> Option<Arc<Snapshot<R>>> {
        if self.complete.load(Ordering::Acquire) {
            Some(self.snapshot.load_full())
        } else {
            None
        }
    }

    /// Every row of `group`, fetching the group if it is not known yet
    pub fn get_by_group(&self, group: GroupKey) -> CacheResult<Vec<Arc<R>>> {
        if let Some(snapshot) = self.snapshot() {
            self.stats.hit();
            return Ok(snapshot.group(&group));
        }

        if let Some(rows) = self.state.read().group(&group) {
            self.stats.hit();
            return Ok(rows);
        }

        let mut state = self.state.write();
        if let Some(snapshot) = self.snapshot() {
            self.stats.hit();
            return Ok(snapshot.group(&group));
        }
        // Another thread may have fetched it while we waited
        if let Some(rows) = state.group(&group) {
            self.stats.hit();
            return Ok(rows);
        }

        self.stats.miss();
        let fetched = self.fetch(Some(&FilterExpr::GroupEquals(group)))?;
        let (members, strays): (Vec<R>, Vec<R>) =
            fetched.into_iter().partition(|row| row.group() == group);
        if !strays.is_empty() {
            log::debug!(
                "Ignoring {} rows outside group {} returned for table '{}'",
                strays.len(),
                group,
                R::TABLE
            );
        }
        state.merge_group(group, members);
        Ok(state.group(&group).unwrap_or_default())
    }

    /// Row `id`, fetching its whole sibling group on a miss
    pub fn get_by_id(&self, id: RowId) -> CacheResult<Option<Arc<R>>> {
        if let Some(snapshot) = self.snapshot() {
            self.stats.hit();
            return Ok(snapshot.get(id));
        }

        if let Some(row) = self.state.read().rows.get(&id).cloned() {
            self.stats.hit();
            return Ok(Some(row));
        }

        let mut state = self.state.write();
        if let Some(snapshot) = self.snapshot() {
            self.stats.hit();
            return Ok(snapshot.get(id));
        }
        if let Some(row) = state.rows.get(&id).cloned() {
            self.stats.hit();
            return Ok(Some(row));
        }

        self.stats.miss();
        let fetched = self.fetch(Some(&FilterExpr::GroupOfId(id)))?;
        for (group, members) in split_by_group(fetched) {
            state.merge_group(group, members);
        }
        Ok(state.rows.get(&id).cloned())
    }

    pub fn contains(&self, id: RowId) -> CacheResult<bool> {
        Ok(self.get_by_id(id)?.is_some())
    }

    /// Download every row not cached yet and switch to lock-free reads
    ///
    /// Groups already known are excluded from the fetch. A second call on a
    /// fully materialized cache does nothing.
    pub fn force_full_materialization(&self) -> CacheResult<()> {
        let mut state = self.state.write();
        if self.complete.load(Ordering::Acquire) {
            return Ok(());
        }
        self.materialize_locked(&mut state)
    }

    fn materialize_locked(&self, state: &mut PartialState<R>) -> CacheResult<()> {
        let fetched = if state.groups.is_empty() {
            self.fetch(None)?
        } else {
            let excluded = ExclusionSet::encode(state.groups.keys(), self.compact_exclusions);
            self.fetch(Some(&FilterExpr::GroupNotIn(excluded)))?
        };

        let fetched_rows = fetched.len();
        let fresh = fetched
            .into_iter()
            .filter(|row| !state.knows_group(&row.group()))
            .map(Arc::new);
        let snapshot = Snapshot::build(state.rows.values().cloned().chain(fresh));

        log::info!(
            "Table '{}' fully materialized: {} rows in {} groups ({} fetched)",
            R::TABLE,
            snapshot.len(),
            snapshot.group_count(),
            fetched_rows
        );

        self.snapshot.store(Arc::new(snapshot));
        self.complete.store(true, Ordering::Release);
        state.clear();
        Ok(())
    }

    /// Pick up rows inserted after the highest id seen so far
    pub fn handle_row_inserted_notice(&self) -> CacheResult<()> {
        let mut state = self.state.write();

        if self.complete.load(Ordering::Acquire) {
            let current = self.snapshot.load_full();
            let fetched = self.fetch_after(current.max_id())?;
            if fetched.is_empty() {
                return Ok(());
            }

            let mut next = Snapshot::clone(&current);
            let added = fetched.len();
            for row in fetched {
                next.insert(Arc::new(row));
            }
            self.snapshot.store(Arc::new(next));
            log::debug!("Merged {} inserted rows into '{}' snapshot", added, R::TABLE);
            return Ok(());
        }

        // Nothing known means nothing a new row could complete
        if state.groups.is_empty() {
            return Ok(());
        }

        let fetched = self.fetch_after(state.max_id)?;
        let mut merged = 0;
        let mut skipped = 0;
        for row in fetched {
            let id = row.id();
            if state.knows_group(&row.group()) {
                state.insert(Arc::new(row));
                merged += 1;
            } else {
                // Left for a future fetch of its group
                state.max_id = state.max_id.max(Some(id));
                skipped += 1;
            }
        }
        log::debug!(
            "Row insert notice for '{}': merged {}, skipped {} in unknown groups",
            R::TABLE,
            merged,
            skipped
        );
        Ok(())
    }

    /// Drop cached groups, or everything when `ids` is `None`
    ///
    /// A fully materialized cache is not cleared by a full invalidation; it is
    /// refreshed in the background instead. A partial invalidation demotes it
    /// to partial and schedules the same refresh.
    pub fn invalidate_rows(&self, ids: Option<&[RowId]>) {
        let mut state = self.state.write();
        let complete = self.complete.load(Ordering::Acquire);

        match ids {
            None if complete => {
                drop(state);
                log::debug!("Scheduling refresh of materialized table '{}'", R::TABLE);
                self.schedule_rematerialize();
            }
            None => {
                state.clear();
                log::debug!("Cleared partial cache of table '{}'", R::TABLE);
            }
            Some(ids) if complete => {
                let snapshot = self.snapshot.load_full();
                let dropped: HashSet<GroupKey> = ids
                    .iter()
                    .filter_map(|id| snapshot.get(*id).map(|row| row.group()))
                    .collect();
                if dropped.is_empty() {
                    return;
                }
                *state = PartialState::from_snapshot(&snapshot, &dropped);
                self.complete.store(false, Ordering::Release);
                drop(state);
                log::debug!(
                    "Demoted table '{}' to partial, dropped {} groups",
                    R::TABLE,
                    dropped.len()
                );
                self.schedule_rematerialize();
            }
            Some(ids) => {
                let dropped = state.remove_groups_of(ids);
                log::debug!("Dropped {} groups of table '{}'", dropped, R::TABLE);
            }
        }
    }

    /// Bring the cache back to fully materialized
    ///
    /// A complete cache is reloaded from scratch and swapped in; a partial
    /// one fetches only its missing groups.
    pub fn rematerialize(&self) -> CacheResult<()> {
        let mut state = self.state.write();
        if !self.complete.load(Ordering::Acquire) {
            return self.materialize_locked(&mut state);
        }

        let fetched = self.fetch(None)?;
        let snapshot = Snapshot::build(fetched.into_iter().map(Arc::new));
        log::info!("Reloaded table '{}': {} rows", R::TABLE, snapshot.len());
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// Number of cached rows
    pub fn len(&self) -> usize {
        match self.snapshot() {
            Some(snapshot) => snapshot.len(),
            None => self.state.read().rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of known groups
    pub fn group_count(&self) -> usize {
        match self.snapshot() {
            Some(snapshot) => snapshot.group_count(),
            None => self.state.read().groups.len(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn schedule_rematerialize(&self) {
        let task: Weak<dyn DeferredTask> = self.self_ref.clone();
        self.scheduler.schedule(self.rematerialize_delay, task);
    }

    fn fetch_after(&self, max_id: Option<RowId>) -> CacheResult<Vec<R>> {
        match max_id {
            Some(max_id) => self.fetch(Some(&FilterExpr::IdGreaterThan(max_id))),
            None => self.fetch(None),
        }
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

impl<R: SiblingRow> Invalidate for SiblingGroupCache<R> {
    fn invalidate(&self, keys: Option<&[FilterValue]>) {
        match keys {
            Some(keys) => self.invalidate_rows(Some(&decode_keys::<RowId>(keys))),
            None => self.invalidate_rows(None),
        }
    }

    fn handle_row_inserted_notice(&self) -> CacheResult<()> {
        SiblingGroupCache::handle_row_inserted_notice(self)
    }
}

impl<R: SiblingRow> DeferredTask for SiblingGroupCache<R> {
    fn run_deferred(&self) {
        if let Err(e) = self.rematerialize() {
            log::warn!("Background refresh of table '{}' failed: {}", R::TABLE, e);
        }
    }
}
