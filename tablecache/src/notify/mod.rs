// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Change notifications
//!
//! The remote store announces row changes per resource (row type). Notices
//! travel over a [`NotificationBus`] to every attached [`TableRegistry`],
//! which forwards them to the affected caches.
//!
//! [`TableRegistry`]: crate::registry::TableRegistry

pub mod bus;

pub use bus::{NotificationBus, SubscriptionId};

use crate::row::{CachedRow, ResourceId};
use crate::source::FilterValue;
use std::fmt;

/// What changed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// Rebuild the table now, before the notice is acknowledged
    ReloadTable,
    /// Rebuild the table the next time it is accessed
    ReloadTableOnNextAccess,
    /// Only the listed entries changed: row ids for sibling-group caches,
    /// keys for keyed caches
    InvalidateParts(Vec<FilterValue>),
    /// Rows were appended to the table
    NoticeRowInsert,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::ReloadTable => f.write_str("reload"),
            ChangeKind::ReloadTableOnNextAccess => f.write_str("reload on next access"),
            ChangeKind::InvalidateParts(keys) => write!(f, "invalidate {} keys", keys.len()),
            ChangeKind::NoticeRowInsert => f.write_str("row insert"),
        }
    }
}

/// A change addressed to one resource, or to every loaded table when
/// `resource` is `None`
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    pub resource: Option<ResourceId>,
    pub kind: ChangeKind,
}

impl ChangeNotice {
    pub fn new(resource: ResourceId, kind: ChangeKind) -> Self {
        Self {
            resource: Some(resource),
            kind,
        }
    }

    pub fn for_table<R: CachedRow>(kind: ChangeKind) -> Self {
        Self::new(ResourceId::of::<R>(), kind)
    }

    pub fn global(kind: ChangeKind) -> Self {
        Self {
            resource: None,
            kind,
        }
    }

    pub fn is_global(&self) -> bool {
        self.resource.is_none()
    }
}

impl fmt::Display for ChangeNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{} on '{}'", self.kind, resource),
            None => write!(f, "{} on all tables", self.kind),
        }
    }
}

/// Receives change notices from a bus
///
/// Listeners handle their own failures; the publisher is never told.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, notice: &ChangeNotice);
}
