// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared fixtures for unit tests

use crate::row::{CachedRow, GroupKey, KeyedBy, RowId, SiblingRow};
use crate::source::{FilterValue, Filterable, MemoryRowSource};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A row grouped by `(parent, owner)` and keyed by owner
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Item {
    pub id: RowId,
    pub parent: i64,
    pub owner: i64,
    pub name: String,
}

impl Item {
    pub fn new(id: RowId, parent: i64, owner: i64) -> Self {
        Self {
            id,
            parent,
            owner,
            name: format!("item-{}", id),
        }
    }

    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl CachedRow for Item {
    const TABLE: &'static str = "items";

    fn id(&self) -> RowId {
        self.id
    }
}

impl SiblingRow for Item {
    fn group(&self) -> GroupKey {
        GroupKey::pair(self.parent, self.owner)
    }
}

impl KeyedBy<i64> for Item {
    const KEY_COLUMN: &'static str = "owner";

    fn key(&self) -> i64 {
        self.owner
    }
}

impl Filterable for Item {
    fn group_key(&self) -> Option<GroupKey> {
        Some(self.group())
    }

    fn column_value(&self, column: &str) -> Option<FilterValue> {
        match column {
            "id" => Some(FilterValue::Int(self.id)),
            "owner" => Some(FilterValue::Int(self.owner)),
            _ => None,
        }
    }
}

pub(crate) fn item_source(rows: Vec<Item>) -> Arc<MemoryRowSource<Item>> {
    Arc::new(MemoryRowSource::with_rows(rows))
}

/// Poll `condition` until it holds or `timeout` elapses
pub(crate) fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
