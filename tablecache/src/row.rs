// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Row model shared by every cache
//!
//! Rows are immutable once loaded. A cache replaces an entry wholesale when a
//! newer version of a row arrives; it never mutates fields in place.

use crate::cache::CacheKey;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;

/// Stable identity of a row within its table
pub type RowId = i64;

/// Grouping attributes of a row
///
/// Rows with equal group keys are siblings. Tables grouped by a single column
/// use [`GroupKey::single`], which leaves `minor` at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub major: i64,
    pub minor: i64,
}

impl GroupKey {
    pub const fn single(value: i64) -> Self {
        Self {
            major: value,
            minor: 0,
        }
    }

    pub const fn pair(major: i64, minor: i64) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.major, self.minor)
    }
}

/// A row of a declared table type
pub trait CachedRow: Clone + fmt::Debug + Send + Sync + 'static {
    /// Name of the table this row type is loaded from
    const TABLE: &'static str;

    fn id(&self) -> RowId;
}

/// A row that belongs to a sibling group
pub trait SiblingRow: CachedRow {
    fn group(&self) -> GroupKey;
}

/// A row that can be looked up by a key of type `K`
///
/// One row type may be keyed several ways, each producing its own cache.
pub trait KeyedBy<K: CacheKey>: CachedRow {
    /// Column the row source filters on when fetching a single key
    const KEY_COLUMN: &'static str;

    fn key(&self) -> K;
}

/// Token addressing "all rows of row type R"
///
/// Change notifications carry a resource id to reach the caches built over
/// that row type. It is a plain value, valid for the whole process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    type_id: TypeId,
    table: &'static str,
}

impl ResourceId {
    pub fn of<R: CachedRow>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            table: R::TABLE,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table)
    }
}
