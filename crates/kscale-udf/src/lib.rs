//! kscale-udf — stream handler for metric-driven scaling.
//!
//! A stream processor connects over a Unix socket and speaks a
//! line-delimited JSON protocol. Each connection gets its own
//! [`Handler`], configured once by an `init` request; every connection
//! shares the same [`Coordinator`](kscale_autoscale::Coordinator), so
//! decisions for a service are serialized process-wide.
//!
//! # Protocol
//!
//! ```text
//! → {"type":"info"}
//! ← {"type":"info","wants":"stream","provides":"stream","options":{...}}
//! → {"type":"init","options":[{"name":"id","values":[{"type":"string","value":"abc"}]}, ...]}
//! ← {"type":"init","success":true}
//! → {"type":"point","time":1700000000000000000,"fields_double":{"cpu_usage":10.0}, ...}
//! ← {"type":"point","time":1700000000000000000,"fields_int":{"scale":3}, ...}
//! ```
//!
//! # Point pipeline
//!
//! ```text
//! point ─► when(fields) ─false─► forward unchanged
//!               │true
//!               ▼
//!          Coordinator::decide(id, point.time, by(current))
//!               ├── skipped (cooldown, transitioning) ─► forward unchanged
//!               ├── error ─► log, forward unchanged
//!               └── target resolved ─► forward with fields = {scale: target}
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;

pub use config::{HandlerConfig, ScaleRule, parse_duration};
pub use error::{ConfigError, HandlerError};
pub use handler::{Handler, Processed};
pub use protocol::{OptionSpec, OptionValue, Point, Request, Response};
pub use server::{Incoming, run_connection, serve};
