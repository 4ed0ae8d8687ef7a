//! svcfab Fabric Core
//!
//! The closed-loop reliability-tiered peer cache and the discovery/allocation
//! controller that drives it.
//!
//! # Architecture
//!
//! - [`TierTable`] is the pure in-memory band structure: three reliability
//!   bands of provider records, each kept sorted by observed rtt.
//! - [`PeerCache`] wraps the table in the single mutex that serializes adds,
//!   removals, look-ups, and sweeps.
//! - [`Sweeper`] is the background task: each tick it probes every tracked
//!   provider against its service's latency budgets, re-bands by reliability,
//!   flushes the trash band, and re-sorts. The tick timer is re-armed only
//!   after a sweep completes, so sweeps never overlap.
//! - [`Controller`] resolves a service hash to a usable provider: cache hit,
//!   then overlay discovery, then remote allocation by ranked allocators -
//!   and forwards application requests to the chosen manager.
//!
//! The cache is soft state: in-memory, reconstructable from discovery, and
//! intentionally volatile across restarts.

pub mod cache;
pub mod controller;
pub mod record;
pub mod sweeper;
pub mod tiers;

pub use cache::PeerCache;
pub use controller::{Controller, Resolution};
pub use record::{ProviderRecord, ProviderRequest};
pub use sweeper::{Sweeper, SweeperConfig};
pub use tiers::TierTable;
