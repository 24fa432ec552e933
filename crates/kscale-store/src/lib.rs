//! kscale-store — the remote scale store.
//!
//! The control plane owns the authoritative instance count of every
//! service and a flag telling whether the service is mid-transition.
//! This crate exposes that as the [`ScaleStore`] trait with two
//! implementations:
//!
//! - [`RancherClient`] talks HTTP/1.1 to the control-plane API using
//!   basic auth taken from the base URL. `https` bases go through
//!   rustls; see [`TlsConfig`].
//! - [`MemoryScaleStore`] keeps everything in-process, for tests and
//!   dry runs.
//!
//! # HTTP contract
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/v1/services/{id}` | → `{id, name, scale, transitioning}` |
//! | PUT | `/v1/services/{id}` | `{scale}` → ignored |

pub mod client;
pub mod error;
pub mod memory;
pub mod transport;
pub mod types;

pub use client::RancherClient;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryScaleStore;
pub use transport::TlsConfig;
pub use types::{RemoteService, ScaleRequest, ScaleStore};
