//! Synchronous publish/subscribe lists, one per entity definition.

use crate::protocol::{ArgValue, EntityName, MemberCategory, WireIndex};
use ahash::AHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub type ObserverFn = dyn Fn(&MemberEvent<'_>) + Send + Sync;

/// What an observer receives when a member fires.
#[derive(Debug, Clone, Copy)]
pub struct MemberEvent<'a> {
    pub entity: &'a str,
    pub category: MemberCategory,
    pub index: WireIndex,
    pub member: &'a str,
    pub values: &'a [ArgValue],
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) owner: u64,
    pub(crate) entity: EntityName,
    pub(crate) category: MemberCategory,
    pub(crate) index: WireIndex,
    pub(crate) id: u64,
}

impl SubscriptionHandle {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn category(&self) -> MemberCategory {
        self.category
    }

    pub fn index(&self) -> WireIndex {
        self.index
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscriber {
    id: u64,
    callback: Arc<ObserverFn>,
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

pub struct ObserverRegistry {
    owner: u64,
    next_id: AtomicU64,
    slots: RwLock<AHashMap<(MemberCategory, WireIndex), Vec<Subscriber>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU64::new(0),
            slots: RwLock::new(AHashMap::new()),
        }
    }

    /// Process-unique token; subscription ids are only meaningful together
    /// with the owner that issued them.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn subscribe(&self, category: MemberCategory, index: WireIndex, callback: Arc<ObserverFn>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry((category, index))
            .or_default()
            .push(Subscriber { id, callback });
        id
    }

    pub fn unsubscribe(&self, category: MemberCategory, index: WireIndex, id: u64) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = slots.get_mut(&(category, index)) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            slots.remove(&(category, index));
        }
        removed
    }

    pub fn count(&self, category: MemberCategory, index: WireIndex) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(category, index))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Call every subscriber of the event's member in subscription order.
    ///
    /// The list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe without deadlocking. A panicking callback is logged and
    /// counted; the remaining callbacks still run.
    pub fn notify(&self, event: &MemberEvent<'_>) -> Delivery {
        let callbacks: Vec<Arc<ObserverFn>> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&(event.category, event.index)) {
                Some(subscribers) => subscribers.iter().map(|s| Arc::clone(&s.callback)).collect(),
                None => return Delivery::default(),
            }
        };

        let mut delivery = Delivery::default();
        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivery.delivered += 1,
                Err(_) => {
                    delivery.failed += 1;
                    tracing::warn!(
                        entity = event.entity,
                        member = event.member,
                        category = %event.category,
                        "observer panicked; continuing with remaining observers"
                    );
                }
            }
        }
        delivery
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let total: usize = slots.values().map(Vec::len).sum();
        f.debug_struct("ObserverRegistry")
            .field("owner", &self.owner)
            .field("members", &slots.len())
            .field("subscribers", &total)
            .finish()
    }
}
