// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for row fetching and cache construction

use thiserror::Error;

/// Failure reported by a [`RowSource`](crate::source::RowSource).
///
/// Transient failures are expected to be retried by the source itself; by the
/// time one reaches the cache the retries have been exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Failed to fetch rows for table '{table}': {source}")]
    Fetch {
        table: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("No row source registered for table '{0}'")]
    SourceNotRegistered(&'static str),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl CacheError {
    pub fn fetch(table: &'static str, source: FetchError) -> Self {
        CacheError::Fetch { table, source }
    }

    /// True when the failure came from the remote store rather than from
    /// local configuration.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, CacheError::Fetch { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::InvalidConfig(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for CacheError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        CacheError::ThreadPool(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
