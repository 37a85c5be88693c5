// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Row predicates handed to a row source
//!
//! The cache only states *which* rows it needs. Turning a [`FilterExpr`] into
//! the remote store's query syntax is the row source's job.

use crate::row::{CachedRow, GroupKey, RowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A scalar compared against a key column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::Text(v) => write!(f, "'{}'", v),
            FilterValue::Uuid(v) => write!(f, "'{}'", v),
        }
    }
}

/// Predicate over declared id, group, or key columns
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    IdEquals(RowId),
    IdGreaterThan(RowId),
    GroupEquals(GroupKey),
    /// Every row sharing the group of the row with this id
    GroupOfId(RowId),
    GroupNotIn(ExclusionSet),
    KeyEquals {
        column: &'static str,
        value: FilterValue,
    },
}

/// Row-side accessors needed to evaluate a [`FilterExpr`] in memory
pub trait Filterable: CachedRow {
    fn group_key(&self) -> Option<GroupKey> {
        None
    }

    fn column_value(&self, column: &str) -> Option<FilterValue> {
        let _ = column;
        None
    }
}

impl FilterExpr {
    /// Evaluate against an in-memory row
    ///
    /// `group_of` resolves the group of an arbitrary row id, which
    /// [`FilterExpr::GroupOfId`] needs.
    pub fn matches<R, F>(&self, row: &R, group_of: F) -> bool
    where
        R: Filterable,
        F: Fn(RowId) -> Option<GroupKey>,
    {
        match self {
            FilterExpr::IdEquals(id) => row.id() == *id,
            FilterExpr::IdGreaterThan(id) => row.id() > *id,
            FilterExpr::GroupEquals(group) => row.group_key() == Some(*group),
            FilterExpr::GroupOfId(id) => match (group_of(*id), row.group_key()) {
                (Some(target), Some(group)) => target == group,
                _ => false,
            },
            FilterExpr::GroupNotIn(excluded) => {
                row.group_key().map_or(true, |group| !excluded.contains(&group))
            }
            FilterExpr::KeyEquals { column, value } => {
                row.column_value(column).as_ref() == Some(value)
            }
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::IdEquals(id) => write!(f, "id = {}", id),
            FilterExpr::IdGreaterThan(id) => write!(f, "id > {}", id),
            FilterExpr::GroupEquals(group) => write!(f, "group = {}", group),
            FilterExpr::GroupOfId(id) => write!(f, "group = (group of id {})", id),
            FilterExpr::GroupNotIn(excluded) => {
                write!(f, "group NOT IN ({} groups", excluded.len())?;
                if let ExclusionSet::Packed { minor_bits, .. } = excluded {
                    write!(f, ", packed {} bits", minor_bits)?;
                }
                f.write_str(")")
            }
            FilterExpr::KeyEquals { column, value } => write!(f, "{} = {}", column, value),
        }
    }
}

/// The set of already-known groups excluded from a completion fetch
///
/// `Packed` folds each `(major, minor)` pair into one `u64` as
/// `major << minor_bits | minor`, where `minor_bits` is the narrowest width
/// holding the largest minor value. Both encodings are kept sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionSet {
    Plain(Vec<GroupKey>),
    Packed { minor_bits: u32, values: Vec<u64> },
}

impl ExclusionSet {
    /// Encode a set of group keys, packing them when `compact` is set and
    /// every key fits the packed form.
    pub fn encode<'a, I>(groups: I, compact: bool) -> Self
    where
        I: IntoIterator<Item = &'a GroupKey>,
    {
        let mut keys: Vec<GroupKey> = groups.into_iter().copied().collect();
        keys.sort_unstable();
        keys.dedup();

        if compact {
            if let Some(packed) = Self::pack(&keys) {
                return packed;
            }
        }
        ExclusionSet::Plain(keys)
    }

    fn pack(keys: &[GroupKey]) -> Option<Self> {
        if keys.iter().any(|key| key.major < 0 || key.minor < 0) {
            return None;
        }

        let max_minor = keys.iter().map(|key| key.minor as u64).max().unwrap_or(0);
        let minor_bits = bit_width(max_minor);

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(pack_key(key.major as u64, key.minor as u64, minor_bits)?);
        }
        values.sort_unstable();

        Some(ExclusionSet::Packed { minor_bits, values })
    }

    pub fn contains(&self, group: &GroupKey) -> bool {
        match self {
            ExclusionSet::Plain(keys) => keys.binary_search(group).is_ok(),
            ExclusionSet::Packed { minor_bits, values } => {
                if group.major < 0 || group.minor < 0 {
                    return false;
                }
                let minor = group.minor as u64;
                if minor > low_mask(*minor_bits) {
                    return false;
                }
                match pack_key(group.major as u64, minor, *minor_bits) {
                    Some(value) => values.binary_search(&value).is_ok(),
                    None => false,
                }
            }
        }
    }

    /// Decode back into group keys
    pub fn groups(&self) -> Vec<GroupKey> {
        match self {
            ExclusionSet::Plain(keys) => keys.clone(),
            ExclusionSet::Packed { minor_bits, values } => values
                .iter()
                .map(|value| {
                    GroupKey::pair(
                        (value >> minor_bits) as i64,
                        (value & low_mask(*minor_bits)) as i64,
                    )
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ExclusionSet::Plain(keys) => keys.len(),
            ExclusionSet::Packed { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn bit_width(value: u64) -> u32 {
    u64::BITS - value.leading_zeros()
}

fn low_mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn pack_key(major: u64, minor: u64, minor_bits: u32) -> Option<u64> {
    if minor_bits == 0 {
        return Some(major);
    }
    // major must survive the shift intact
    if major >> (u64::BITS - minor_bits) != 0 {
        return None;
    }
    Some((major << minor_bits) | minor)
}
