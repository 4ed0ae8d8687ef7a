//! svcfab Metrics Collection
//!
//! Thread-safe counters for the fabric's resolve path, the sweeper, and the
//! node roles, plus the local HTTP endpoint that exposes them as JSON.
//!
//! The hot path is lock-free: every counter is an `AtomicU64` bumped with a
//! relaxed increment. [`MetricsSnapshot`] is the serializable point-in-time
//! view served by the endpoint. The endpoint is purely observational - it is
//! never consulted by the fabric itself.

mod registry;
mod server;
mod snapshot;

pub use registry::FabricMetrics;
pub use server::serve;
pub use snapshot::MetricsSnapshot;
