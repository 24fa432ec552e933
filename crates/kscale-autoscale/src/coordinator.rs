//! Scaling coordinator: cooldown gate, remote refresh, clamp and write.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use kscale_expr::EvalError;
use kscale_store::{ScaleStore, StoreError, StoreResult};
use serde::Serialize;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info, warn};

use crate::error::{ScaleError, ScaleResult};
use crate::registry::{ServiceRegistry, ServiceState};

/// Source of "now" for cooldown expiry.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Default bound on a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Limits applied to every decision of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePolicy {
    pub min_instances: i64,
    pub max_instances: i64,
    /// Window after an applied decision during which new ones are skipped.
    pub cooldown: Duration,
    /// Compute and record decisions without writing them remotely.
    pub simulate: bool,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 3,
            cooldown: Duration::from_secs(60),
            simulate: false,
        }
    }
}

impl ScalePolicy {
    /// Constrain `target` to `[min_instances, max_instances]`.
    pub fn clamp(&self, target: i64) -> i64 {
        target.max(self.min_instances).min(self.max_instances)
    }
}

/// Why a decision did not change anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InCooldown,
    Unchanged,
    Transitioning,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SkipReason::InCooldown => "in cooldown",
            SkipReason::Unchanged => "unchanged",
            SkipReason::Transitioning => "transitioning",
        })
    }
}

/// Result of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub service_id: String,
    /// Clamped target, or the last known count when skipped early.
    pub target_instances: i64,
    /// Whether a remote write was issued and succeeded.
    pub applied: bool,
    pub skipped: Option<SkipReason>,
}

impl DecisionOutcome {
    fn skipped(service_id: &str, target_instances: i64, reason: SkipReason) -> Self {
        Self {
            service_id: service_id.to_string(),
            target_instances,
            applied: false,
            skipped: Some(reason),
        }
    }

    /// Whether a target was resolved (as opposed to skipping before the
    /// formula ran).
    pub fn is_resolved(&self) -> bool {
        matches!(self.skipped, None | Some(SkipReason::Unchanged))
    }
}

/// Exclusive hold on one service's state for the length of a decision.
///
/// Dropping the guard abandons the decision and releases the service.
#[derive(Debug)]
pub struct DecisionGuard {
    state: OwnedRwLockWriteGuard<ServiceState>,
}

impl DecisionGuard {
    pub fn service_id(&self) -> &str {
        self.state.id()
    }

    pub fn service_name(&self) -> &str {
        self.state.name()
    }

    /// Instance count freshly read from the control plane.
    pub fn current_instances(&self) -> i64 {
        self.state.current_instances()
    }
}

/// Answer to [`Coordinator::request_decision`].
#[derive(Debug)]
pub enum Admission {
    /// The caller holds the service until the guard is committed or dropped.
    Granted(DecisionGuard),
    /// Nothing to do for this event.
    Skipped(DecisionOutcome),
}

/// Coordinates scaling decisions across services.
///
/// One coordinator can be shared by many connections; each service has
/// at most one decision in flight at a time.
pub struct Coordinator {
    registry: ServiceRegistry,
    store: Arc<dyn ScaleStore>,
    request_timeout: Duration,
    clock: Clock,
}

impl Coordinator {
    /// Create a coordinator over `store` with an unbounded registry.
    pub fn new(store: Arc<dyn ScaleStore>) -> Self {
        Self {
            registry: ServiceRegistry::new(),
            store,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            clock: Arc::new(SystemTime::now),
        }
    }

    /// Replace the registry (for example with a bounded one).
    pub fn with_registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Bound every remote call by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use `clock` instead of the system clock for cooldown expiry.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Try to start a decision for `service_id` triggered by an event at
    /// `event_time`.
    ///
    /// On `Granted`, the current instance count has been refreshed from
    /// the control plane and the service is held exclusively until the
    /// guard goes away.
    pub async fn request_decision(
        &self,
        service_id: &str,
        event_time: SystemTime,
    ) -> ScaleResult<Admission> {
        let shared = self.registry.get(service_id).await;

        // Fast path: shared read, no remote call.
        {
            let state = shared.read().await;
            if state.in_cooldown(event_time) {
                debug!(service = %service_id, "skip scaling because of cooldown");
                return Ok(Admission::Skipped(DecisionOutcome::skipped(
                    service_id,
                    state.current_instances,
                    SkipReason::InCooldown,
                )));
            }
        }

        let mut state = shared.write_owned().await;
        // A decision may have completed while we waited for the lock.
        if state.in_cooldown(event_time) {
            debug!(service = %service_id, "skip scaling because of cooldown");
            return Ok(Admission::Skipped(DecisionOutcome::skipped(
                service_id,
                state.current_instances,
                SkipReason::InCooldown,
            )));
        }

        let remote = self
            .bounded(self.store.get_service(service_id))
            .await
            .map_err(|source| ScaleError::RemoteRead {
                service: service_id.to_string(),
                source,
            })?;

        if remote.is_transitioning() {
            debug!(
                service = %service_id,
                transitioning = %remote.transitioning,
                "skip scaling, service is transitioning"
            );
            return Ok(Admission::Skipped(DecisionOutcome::skipped(
                service_id,
                remote.scale,
                SkipReason::Transitioning,
            )));
        }

        state.current_instances = remote.scale;
        state.name = remote.name;
        Ok(Admission::Granted(DecisionGuard { state }))
    }

    /// Finish a granted decision with the formula's raw result.
    ///
    /// The target is clamped into the policy's range. Unchanged targets
    /// are not written and do not start a cooldown. A failed write leaves
    /// the state as it was.
    pub async fn commit(
        &self,
        guard: DecisionGuard,
        raw_target: i64,
        policy: &ScalePolicy,
    ) -> ScaleResult<DecisionOutcome> {
        let mut state = guard.state;
        let target = policy.clamp(raw_target);
        let from = state.current_instances;

        if target == from {
            debug!(service = %state.id(), instances = target, "skip scaling, count unchanged");
            return Ok(DecisionOutcome::skipped(
                state.id(),
                target,
                SkipReason::Unchanged,
            ));
        }

        debug!(
            service = %state.id(),
            from,
            to = target,
            raw = raw_target,
            "attempt to scale service"
        );

        if !policy.simulate {
            let id = state.id().to_string();
            if let Err(source) = self.bounded(self.store.set_scale(&id, target)).await {
                warn!(service = %id, target, error = %source, "scaling action failed");
                return Err(ScaleError::RemoteWrite {
                    service: id,
                    source,
                });
            }
        }

        let now = (self.clock)();
        let until = now.checked_add(policy.cooldown).unwrap_or(now);
        state.current_instances = target;
        state.cooldown_until = state.cooldown_until.max(until);

        info!(
            service = %state.id(),
            from,
            to = target,
            simulate = policy.simulate,
            "scaled service"
        );

        Ok(DecisionOutcome {
            service_id: state.id().to_string(),
            target_instances: target,
            applied: !policy.simulate,
            skipped: None,
        })
    }

    /// Run a whole decision: admission, formula, commit.
    ///
    /// `formula` receives the refreshed instance count and returns the
    /// raw (unclamped) target.
    pub async fn decide<F>(
        &self,
        service_id: &str,
        event_time: SystemTime,
        policy: &ScalePolicy,
        formula: F,
    ) -> ScaleResult<DecisionOutcome>
    where
        F: FnOnce(i64) -> Result<i64, EvalError>,
    {
        let guard = match self.request_decision(service_id, event_time).await? {
            Admission::Granted(guard) => guard,
            Admission::Skipped(outcome) => return Ok(outcome),
        };
        let raw = formula(guard.current_instances())?;
        self.commit(guard, raw, policy).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.request_timeout)),
        }
    }
}
