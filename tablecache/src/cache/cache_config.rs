// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache configuration and policies

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by a registry and every cache it builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableCacheConfig {
    /// Delay before a demoted or invalidated sibling cache is fully
    /// re-materialized in the background
    pub rematerialize_delay: Duration,

    /// Worker threads used by an immediate `load_all`
    pub load_parallelism: usize,

    /// Tables rebuilt first by `load_all`, in this order
    pub priority_tables: Vec<String>,

    /// Bit-pack group exclusion lists when every group key allows it
    pub compact_exclusions: bool,
}

impl Default for TableCacheConfig {
    fn default() -> Self {
        Self {
            rematerialize_delay: Duration::from_secs(2),
            load_parallelism: 4,
            priority_tables: vec!["users".to_string(), "sessions".to_string()],
            compact_exclusions: true,
        }
    }
}

impl TableCacheConfig {
    /// Configuration for hosts that reload many tables at once
    pub fn eager() -> Self {
        Self {
            load_parallelism: 8,
            ..Self::default()
        }
    }

    /// Configuration without background delays, for tests
    pub fn for_tests() -> Self {
        Self {
            rematerialize_delay: Duration::ZERO,
            load_parallelism: 2,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CacheResult<()> {
        if self.load_parallelism == 0 {
            return Err(CacheError::InvalidConfig(
                "load_parallelism must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Position of `table` in the priority list; unlisted tables sort last
    pub(crate) fn priority_of(&self, table: &str) -> usize {
        self.priority_tables
            .iter()
            .position(|name| name == table)
            .unwrap_or(usize::MAX)
    }
}
