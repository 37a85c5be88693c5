// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-process publish/subscribe for change notices

use super::{ChangeListener, ChangeNotice};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Handle returned by [`NotificationBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fans change notices out to subscribed listeners
///
/// Subscribers are held weakly; a listener that has been dropped is pruned
/// on the next publish. Delivery happens outside the subscriber lock, so a
/// listener may subscribe or publish from within `on_change`.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: RwLock<Vec<(SubscriptionId, Weak<dyn ChangeListener>)>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, listener));
        log::debug!("Subscribed listener {:?}", id);
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(subscription, _)| *subscription != id);
        before != subscribers.len()
    }

    /// Deliver `notice` to every live listener, returning how many received it
    pub fn publish(&self, notice: &ChangeNotice) -> usize {
        let sequence = self.published.fetch_add(1, Ordering::Relaxed);
        let (live, dead): (Vec<_>, Vec<_>) = self
            .subscribers
            .read()
            .iter()
            .map(|(id, listener)| (*id, listener.upgrade()))
            .partition(|(_, listener)| listener.is_some());

        if !dead.is_empty() {
            self.subscribers
                .write()
                .retain(|(_, listener)| listener.strong_count() > 0);
            log::debug!("Pruned {} dropped listeners", dead.len());
        }

        log::debug!(
            "Publishing notice #{}: {} to {} listeners",
            sequence,
            notice,
            live.len()
        );
        let listeners: Vec<Arc<dyn ChangeListener>> =
            live.into_iter().filter_map(|(_, listener)| listener).collect();
        for listener in &listeners {
            listener.on_change(notice);
        }
        listeners.len()
    }

    /// Number of subscriptions, including ones whose listener was dropped
    /// since the last publish
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
