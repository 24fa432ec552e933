//! Service state registry.
//!
//! Maps a service id to its scaling state. Lookups take the map's
//! shared lock; only a miss falls back to the exclusive lock, where the
//! lookup is repeated before inserting so that two racing callers end
//! up with the same state object.
//!
//! The map lock is independent of each entry's own lock: holding a
//! service's state never blocks lookups of other services.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::sync::RwLock;
use tracing::debug;

/// Scaling state of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    id: String,
    /// Name reported by the control plane on the last refresh.
    pub(crate) name: String,
    /// Last known instance count; 0 until the first refresh.
    pub(crate) current_instances: i64,
    /// No decision may start for events before this instant.
    pub(crate) cooldown_until: SystemTime,
}

impl ServiceState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            current_instances: 0,
            cooldown_until: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_instances(&self) -> i64 {
        self.current_instances
    }

    pub fn cooldown_until(&self) -> SystemTime {
        self.cooldown_until
    }

    /// Whether an event at `event_time` falls inside the cooldown window.
    pub fn in_cooldown(&self, event_time: SystemTime) -> bool {
        self.cooldown_until > event_time
    }
}

/// State shared between the registry and in-flight decisions.
pub type SharedServiceState = Arc<RwLock<ServiceState>>;

struct Slot {
    state: SharedServiceState,
    /// Registry tick of the most recent lookup.
    last_access: AtomicU64,
}

impl Slot {
    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    /// Nobody but the registry holds the state.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }
}

/// Registry of per-service scaling state.
///
/// Unbounded by default. With a capacity, inserting past it evicts the
/// least recently looked-up service that no decision currently holds;
/// an evicted service starts over with no cooldown.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Slot>>,
    capacity: Option<NonZeroUsize>,
    ticks: AtomicU64,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Create an unbounded registry.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            capacity: None,
            ticks: AtomicU64::new(0),
        }
    }

    /// Create a registry that keeps at most `capacity` idle services.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    /// Return the state for `service_id`, creating it on first use.
    pub async fn get(&self, service_id: &str) -> SharedServiceState {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let services = self.services.read().await;
            if let Some(slot) = services.get(service_id) {
                slot.touch(tick);
                return slot.state.clone();
            }
        }

        let mut services = self.services.write().await;
        // Another caller may have inserted while we waited.
        if let Some(slot) = services.get(service_id) {
            slot.touch(tick);
            return slot.state.clone();
        }

        if let Some(capacity) = self.capacity {
            // Shrink back under the bound once held entries are released.
            while services.len() >= capacity.get() && evict_idle(&mut services) {}
        }

        let state = Arc::new(RwLock::new(ServiceState::new(service_id)));
        services.insert(
            service_id.to_string(),
            Slot {
                state: state.clone(),
                last_access: AtomicU64::new(tick),
            },
        );
        debug!(service = %service_id, tracked = services.len(), "registered service");
        state
    }

    /// Copy of a service's state, if it is registered.
    ///
    /// Waits for any in-flight decision on that service to finish.
    pub async fn snapshot(&self, service_id: &str) -> Option<ServiceState> {
        let state = {
            let services = self.services.read().await;
            services.get(service_id)?.state.clone()
        };
        let guard = state.read().await;
        Some(guard.clone())
    }

    pub async fn contains(&self, service_id: &str) -> bool {
        self.services.read().await.contains_key(service_id)
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}

/// Remove the least recently used idle entry. Returns false when every
/// entry is held.
fn evict_idle(services: &mut HashMap<String, Slot>) -> bool {
    let victim = services
        .iter()
        .filter(|(_, slot)| slot.is_idle())
        .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
        .map(|(id, _)| id.clone());

    match victim {
        Some(id) => {
            services.remove(&id);
            debug!(service = %id, "evicted idle service state");
            true
        }
        None => {
            debug!(
                tracked = services.len(),
                "registry over capacity but every service is busy"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_zero_valued_state_on_first_use() {
        let registry = ServiceRegistry::new();
        assert!(registry.is_empty().await);

        let state = registry.get("abc").await;
        let state = state.read().await;
        assert_eq!(state.id(), "abc");
        assert_eq!(state.current_instances(), 0);
        assert_eq!(state.cooldown_until(), SystemTime::UNIX_EPOCH);
        assert!(registry.contains("abc").await);
    }

    #[tokio::test]
    async fn same_id_returns_same_state() {
        let registry = ServiceRegistry::new();
        let a = registry.get("abc").await;
        let b = registry.get("abc").await;
        let c = registry.get("other").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_lookups_share_one_state() {
        let registry = Arc::new(ServiceRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get("abc").await }));
        }

        let mut states = Vec::new();
        for h in handles {
            states.push(h.await.unwrap());
        }
        assert!(states.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_idle_service() {
        let registry = ServiceRegistry::with_capacity(NonZeroUsize::new(2).unwrap());
        drop(registry.get("a").await);
        drop(registry.get("b").await);
        // Touch `a` so `b` becomes the oldest.
        drop(registry.get("a").await);

        drop(registry.get("c").await);
        assert_eq!(registry.len().await, 2);
        assert!(registry.contains("a").await);
        assert!(!registry.contains("b").await);
        assert!(registry.contains("c").await);
    }

    #[tokio::test]
    async fn never_evicts_a_held_service() {
        let registry = ServiceRegistry::with_capacity(NonZeroUsize::new(1).unwrap());
        let held = registry.get("a").await;

        drop(registry.get("b").await);
        assert!(registry.contains("a").await);
        // Over capacity until `a` is released.
        assert_eq!(registry.len().await, 2);

        drop(held);
        drop(registry.get("c").await);
        assert!(registry.contains("c").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn returns_to_capacity_after_overflow() {
        let registry = ServiceRegistry::with_capacity(NonZeroUsize::new(2).unwrap());
        let a = registry.get("a").await;
        let b = registry.get("b").await;
        let c = registry.get("c").await;
        drop(registry.get("d").await);
        assert_eq!(registry.len().await, 4);

        drop((a, b, c));
        for id in ["e", "f", "g", "h"] {
            drop(registry.get(id).await);
            assert!(registry.len().await <= 2, "over capacity after {id}");
        }
        assert!(registry.contains("h").await);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_service_is_none() {
        let registry = ServiceRegistry::new();
        assert!(registry.snapshot("nope").await.is_none());
        drop(registry.get("abc").await);
        assert_eq!(
            registry.snapshot("abc").await.map(|s| s.current_instances()),
            Some(0)
        );
    }

    #[test]
    fn cooldown_is_exclusive_of_its_end() {
        let mut state = ServiceState::new("abc");
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(100);
        state.cooldown_until = t;
        assert!(state.in_cooldown(t - std::time::Duration::from_secs(1)));
        assert!(!state.in_cooldown(t));
    }
}
