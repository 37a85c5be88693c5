// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Table slots
//!
//! A slot holds at most one constructed table and moves through:
//!
//! ```text
//! Empty ──get──▶ Loading(placeholder) ──build ok──▶ Ready { stale: false }
//!   ▲                  │                                  │
//!   └───build failed───┘                                  │
//!   └──────────────────────────clear──────────────────────┘
//! ```
//!
//! A reload that arrives while the slot is `Loading` cannot discard the
//! placeholder; it marks the placeholder so the result lands as
//! `Ready { stale: true }` and is rebuilt on the next access.

use super::context::BuildContext;
use super::traits::CachedTable;
use crate::cache::Invalidate;
use crate::error::CacheResult;
use crate::row::ResourceId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A constructed table, held both as itself and as its concrete type
#[derive(Clone)]
pub(crate) struct TableObject {
    pub any: Arc<dyn Any + Send + Sync>,
    pub table: Arc<dyn CachedTable>,
}

type Builder = fn(&BuildContext<'_>) -> CacheResult<TableObject>;

fn build_object<T: CachedTable>(ctx: &BuildContext<'_>) -> CacheResult<TableObject> {
    let table = T::build(ctx)?;
    Ok(TableObject {
        any: table.clone(),
        table,
    })
}

struct Placeholder {
    builder_thread: ThreadId,
    reload_requested: bool,
}

enum SlotState {
    Empty,
    Loading(Placeholder),
    Ready { object: TableObject, stale: bool },
}

pub(crate) struct TableSlot {
    pub table: &'static str,
    pub resource: ResourceId,
    builder: Builder,
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl TableSlot {
    pub fn new<T: CachedTable>() -> Self {
        Self {
            table: T::table_name(),
            resource: T::resource_id(),
            builder: build_object::<T>,
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        }
    }

    /// The slot's table, constructing it on this thread if nobody has
    ///
    /// Callers arriving while another thread constructs wait for that
    /// construction. A failed construction leaves the slot empty and is
    /// reported to the thread that ran it; waiters then retry.
    ///
    /// # Panics
    ///
    /// If the constructing thread asks for the table it is constructing.
    pub fn get(&self, ctx: &BuildContext<'_>) -> CacheResult<TableObject> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let constructing = match &*state {
                SlotState::Ready {
                    object,
                    stale: false,
                } => return Ok(object.clone()),
                SlotState::Loading(placeholder) => {
                    assert!(
                        placeholder.builder_thread != current,
                        "table '{}' requested by the thread constructing it",
                        self.table
                    );
                    true
                }
                SlotState::Ready { stale: true, .. } | SlotState::Empty => false,
            };
            if !constructing {
                break;
            }
            self.ready.wait(&mut state);
        }

        *state = SlotState::Loading(Placeholder {
            builder_thread: current,
            reload_requested: false,
        });
        log::debug!("Constructing table '{}'", self.table);

        let outcome = MutexGuard::unlocked(&mut state, || {
            panic::catch_unwind(AssertUnwindSafe(|| (self.builder)(ctx)))
        });
        let reload_requested = matches!(
            &*state,
            SlotState::Loading(Placeholder {
                reload_requested: true,
                ..
            })
        );

        match outcome {
            Ok(Ok(object)) => {
                *state = SlotState::Ready {
                    object: object.clone(),
                    stale: reload_requested,
                };
                self.ready.notify_all();
                if reload_requested {
                    log::debug!("Table '{}' was invalidated while constructing", self.table);
                }
                Ok(object)
            }
            Ok(Err(e)) => {
                *state = SlotState::Empty;
                self.ready.notify_all();
                log::debug!("Constructing table '{}' failed: {}", self.table, e);
                Err(e)
            }
            Err(payload) => {
                *state = SlotState::Empty;
                self.ready.notify_all();
                drop(state);
                panic::resume_unwind(payload)
            }
        }
    }

    /// The constructed table, without constructing or waiting
    pub fn current(&self) -> Option<TableObject> {
        match &*self.state.lock() {
            SlotState::Ready {
                object,
                stale: false,
            } => Some(object.clone()),
            _ => None,
        }
    }

    /// True once a constructed table occupies the slot
    pub fn is_loaded(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Ready { .. })
    }

    /// Drop the constructed table so the next access rebuilds it
    pub fn clear(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            SlotState::Ready { .. } => {
                *state = SlotState::Empty;
                log::debug!("Cleared table '{}'", self.table);
            }
            SlotState::Loading(placeholder) => placeholder.reload_requested = true,
            SlotState::Empty => {}
        }
    }

    /// Invalidate the whole table, in place when it supports that
    pub fn reload_on_next_access(&self) {
        self.with_invalidation(|invalidation| {
            invalidation.invalidate(None);
            Ok(())
        })
        .unwrap_or_else(|e| log::warn!("Invalidating table '{}' failed: {}", self.table, e));
    }

    /// Run `apply` against the constructed table's invalidation contract,
    /// or clear the slot if there is none
    ///
    /// `apply` runs without the slot lock held.
    pub fn with_invalidation<F>(&self, apply: F) -> CacheResult<()>
    where
        F: FnOnce(&dyn Invalidate) -> CacheResult<()>,
    {
        if let Some(object) = self.current() {
            if let Some(invalidation) = object.table.invalidation() {
                return apply(invalidation);
            }
        }
        self.clear();
        Ok(())
    }
}
