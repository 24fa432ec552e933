//! kscale-autoscale — per-service scaling decisions.
//!
//! Events for many services arrive interleaved; for each one that
//! matches its predicate the [`Coordinator`] decides whether, and to
//! what, the service's instance count should change.
//!
//! # Decision flow
//!
//! ```text
//! request_decision(service, event_time)
//!   ├── registry.get(service)          → shared per-service state
//!   ├── shared read:  cooldown_until > event_time ? → Skipped(InCooldown)
//!   ├── exclusive:    re-check cooldown           → Skipped(InCooldown)
//!   ├── store.get_service()            → RemoteRead error | Skipped(Transitioning)
//!   └── Granted(DecisionGuard)         ← exclusive lock travels with the guard
//!
//! commit(guard, raw_target, policy)
//!   ├── clamp into [min, max]
//!   ├── target == current             → Skipped(Unchanged), no cooldown
//!   ├── store.set_scale() unless simulating → RemoteWrite error
//!   └── current = target, cooldown_until = now + cooldown
//! ```
//!
//! The per-service lock is held from the exclusive cooldown check until
//! the guard is committed or dropped, remote calls included. That is what
//! limits every service to one in-flight decision. Remote calls are
//! bounded by a timeout; a timeout counts as a failed read or write.

pub mod coordinator;
pub mod error;
pub mod registry;

pub use coordinator::{
    Admission, Clock, Coordinator, DEFAULT_REQUEST_TIMEOUT, DecisionGuard, DecisionOutcome,
    ScalePolicy, SkipReason,
};
pub use error::{ScaleError, ScaleResult};
pub use registry::{ServiceRegistry, ServiceState, SharedServiceState};
