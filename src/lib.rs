//! Pulse: coordinated refresh cache for slow, rate-limited data sources.
//!
//! The crate serves many concurrent readers a "good enough" snapshot of an
//! upstream source without triggering redundant fetches or blocking readers
//! behind a single in-flight request:
//!
//! - **Cache**: [`cache::SnapshotCache`] holds the last fetched snapshot and
//!   access credential behind one scoped lock and tracks staleness against a
//!   configured TTL.
//! - **Single-flight refresh**: [`cache::RefreshClaim`] lets exactly one
//!   caller perform the slow fetch while everyone else serves stale data or
//!   awaits the in-flight result.
//! - **Scheduler**: [`scheduler::TaskRunner`] dispatches named periodic jobs
//!   from a min-heap ordered by due time and priority, forwarding results to
//!   an optional [`sink::ResultSink`].
//! - **Fetch**: [`fetch::HttpFetcher`] pulls JSON snapshots over HTTPS with a
//!   bearer token from a [`credentials::CredentialProvider`].
//!
//! The `pulsed` binary wires these together into a small daemon.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod sink;

pub use cache::{RefreshClaim, SnapshotCache};
pub use config::PulseConfig;
pub use error::{PulseError, Result};
pub use scheduler::{Task, TaskInterval, TaskRunner, TaskStatus};
