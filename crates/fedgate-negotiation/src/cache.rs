//! At most one in-flight or completed channel per asset.
//!
//! Each slot stores the *shared outcome* of a handshake rather than its
//! result, so callers arriving while the handshake is still running attach
//! to it instead of starting another. A failed handshake removes its own
//! slot before the failure becomes visible, and a rejected channel is
//! evicted by the caller that observed the rejection.

use crate::error::NegotiationError;
use fedgate_types::Channel;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

type Outcome = Result<Channel, NegotiationError>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

struct Slot {
    generation: u64,
    outcome: SharedOutcome,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    entries: HashMap<String, Slot>,
}

/// A channel handed out by the cache, tagged with the slot it came from.
///
/// The generation lets [`ChannelCache::invalidate`] evict exactly the entry
/// that produced this channel and never a fresher one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLease {
    pub asset_id: String,
    pub generation: u64,
    pub channel: Channel,
}

/// What the cache currently holds for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Ready,
}

/// Deduplicating channel cache.
///
/// Uses `std::sync::Mutex` intentionally: every critical section is a short
/// map operation that never spans an `.await`.
#[derive(Clone, Default)]
pub struct ChannelCache {
    slots: Arc<Mutex<Slots>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
        slots.lock().unwrap_or_else(|poisoned| {
            tracing::error!("channel cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn remove_generation(slots: &Mutex<Slots>, asset_id: &str, generation: u64) -> bool {
        let mut slots = Self::lock(slots);
        let matches = slots
            .entries
            .get(asset_id)
            .is_some_and(|slot| slot.generation == generation);
        if matches {
            slots.entries.remove(asset_id);
        }
        matches
    }

    /// Returns the channel for `asset_id`, running `build` only if no entry
    /// is pending or resolved.
    ///
    /// The handshake runs on its own task, so it keeps going even if the
    /// caller that started it goes away. Every caller attached to the same
    /// entry receives the same outcome.
    pub async fn get_or_create<F, Fut>(
        &self,
        asset_id: &str,
        build: F,
    ) -> Result<ChannelLease, NegotiationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (generation, outcome) = {
            let mut slots = Self::lock(&self.slots);
            match slots.entries.get(asset_id) {
                Some(slot) => {
                    tracing::debug!(asset_id, generation = slot.generation, "attaching to cached channel");
                    (slot.generation, slot.outcome.clone())
                }
                None => {
                    slots.next_generation += 1;
                    let generation = slots.next_generation;
                    let outcome = self.spawn_handshake(asset_id, generation, build());
                    slots.entries.insert(
                        asset_id.to_string(),
                        Slot {
                            generation,
                            outcome: outcome.clone(),
                        },
                    );
                    (generation, outcome)
                }
            }
        };

        let channel = outcome.await?;
        Ok(ChannelLease {
            asset_id: asset_id.to_string(),
            generation,
            channel,
        })
    }

    fn spawn_handshake<Fut>(&self, asset_id: &str, generation: u64, handshake: Fut) -> SharedOutcome
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let task_slots = Arc::clone(&self.slots);
        let task_asset = asset_id.to_string();
        let task = tokio::spawn(async move {
            let outcome = handshake.await;
            if outcome.is_err() {
                Self::remove_generation(&task_slots, &task_asset, generation);
            }
            outcome
        });

        let join_slots = Arc::clone(&self.slots);
        let join_asset = asset_id.to_string();
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    Self::remove_generation(&join_slots, &join_asset, generation);
                    Err(NegotiationError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Evicts the entry that issued `lease`, if it is still the current one.
    ///
    /// Returns whether anything was removed.
    pub fn invalidate(&self, lease: &ChannelLease) -> bool {
        let removed = Self::remove_generation(&self.slots, &lease.asset_id, lease.generation);
        if removed {
            tracing::info!(asset_id = %lease.asset_id, generation = lease.generation, "evicted rejected channel");
        }
        removed
    }

    pub fn status(&self, asset_id: &str) -> Option<EntryStatus> {
        let slots = Self::lock(&self.slots);
        slots.entries.get(asset_id).map(|slot| match slot.outcome.peek() {
            Some(Ok(_)) => EntryStatus::Ready,
            _ => EntryStatus::Pending,
        })
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        Self::lock(&self.slots).entries.contains_key(asset_id)
    }

    pub fn len(&self) -> usize {
        Self::lock(&self.slots).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn channel(token: &str) -> Channel {
        Channel::new("http://provider/public", token)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_handshake() {
        let cache = ChannelCache::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let calls = (0..16).map(|_| {
            let cache = cache.clone();
            let builds = Arc::clone(&builds);
            async move {
                cache
                    .get_or_create("node-A", move || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(channel("token-1"))
                    })
                    .await
            }
        });
        let results = futures_util::future::join_all(calls).await;

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().channel, channel("token-1"));
        }
        assert_eq!(cache.status("node-A"), Some(EntryStatus::Ready));
    }

    #[tokio::test]
    async fn failure_clears_the_slot_before_waiters_see_it() {
        let cache = ChannelCache::new();
        let err = cache
            .get_or_create("node-A", || async {
                Err(NegotiationError::Failed("rejected".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::Failed("rejected".to_string()));
        assert!(!cache.contains("node-A"));

        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let lease = cache
            .get_or_create("node-A", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(channel("token-2"))
            })
            .await
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(lease.channel, channel("token-2"));
    }

    #[tokio::test]
    async fn invalidate_only_evicts_the_issuing_generation() {
        let cache = ChannelCache::new();
        let stale = cache
            .get_or_create("node-A", || async { Ok(channel("old")) })
            .await
            .unwrap();
        assert!(cache.invalidate(&stale));
        assert!(!cache.contains("node-A"));

        let fresh = cache
            .get_or_create("node-A", || async { Ok(channel("new")) })
            .await
            .unwrap();
        assert!(fresh.generation > stale.generation);

        // A second report against the stale lease must not drop the fresh entry.
        assert!(!cache.invalidate(&stale));
        assert!(cache.contains("node-A"));
    }

    #[tokio::test]
    async fn different_assets_do_not_share_entries() {
        let cache = ChannelCache::new();
        let a = cache
            .get_or_create("node-A", || async { Ok(channel("a")) })
            .await
            .unwrap();
        let b = cache
            .get_or_create("node-B", || async { Ok(channel("b")) })
            .await
            .unwrap();
        assert_ne!(a.channel, b.channel);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn pending_entry_reports_pending() {
        let cache = ChannelCache::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create("node-A", || async move {
                        let _ = release_rx.await;
                        Ok(channel("late"))
                    })
                    .await
            })
        };

        while !cache.contains("node-A") {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.status("node-A"), Some(EntryStatus::Pending));

        release_tx.send(()).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().channel, channel("late"));
    }
}
