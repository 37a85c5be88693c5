// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Table registry
//!
//! Maps each table type to exactly one cache instance, constructed lazily on
//! first access and shared afterwards:
//!
//! ```text
//! get_or_create::<T>()
//!     ↓ type index (shared lock, grown under exclusive lock)
//! TableSlot (Empty → Loading → Ready)
//!     ↓ CachedTable::build
//! SiblingGroupCache / KeyedCache / LookupTable
//! ```
//!
//! Change notices reach the registry through [`TableRegistry::apply`] or a
//! [`NotificationBus`](crate::notify::NotificationBus) it is attached to.

mod context;
mod slot;
pub mod table_registry;
pub mod traits;

pub use context::BuildContext;
pub use table_registry::{BlockingSection, TableRegistry};
pub use traits::CachedTable;
