//! svcfab Common Types, Overlay Adapter, and Registry Cache
//!
//! This crate provides the shared infrastructure used by every svcfab
//! component:
//!
//! - **Protocol layer**: protocol ids, the allocation wire grammar, the
//!   request-forward sentinel, and the [`FabricError`] error type.
//! - **Overlay adapter**: the [`overlay::Overlay`] capability trait the core
//!   consumes (peer discovery by rendezvous key, stream open by protocol id,
//!   RTT ping, handler registration) plus the shipped QUIC + multicast
//!   implementation.
//! - **Registry cache**: TTL-cached resolution of a service name to its
//!   network requirements.
//!
//! # Architecture
//!
//! Nodes participate in an overlay and play one or more roles: an Allocator
//! spawns service instances on command, a Manager fronts a running instance
//! and proxies application traffic to it, and every participant may run the
//! reliability-tiered peer cache that tracks which remote Managers are usable
//! providers of which services. The fabric core (`svcfab-fabric`) and the
//! role handlers (`svcfab-node`) are written against the capability traits in
//! this crate, so tests substitute scripted implementations without touching
//! the network.

pub mod identity;
pub mod overlay;
pub mod perf;
pub mod protocol;
pub mod registry;

pub use identity::NodeId;
pub use perf::PerfMeasurement;
pub use protocol::error::{FabricError, Result};
