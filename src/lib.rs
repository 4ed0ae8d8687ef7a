//! svcfab - peer-to-peer service allocation and routing fabric.
//!
//! Facade crate re-exporting the workspace members. Nodes participate in an
//! overlay network and play one or several of three roles: an **Allocator**
//! spawns microservice instances on the local host, a **Manager** fronts a
//! running instance and proxies application traffic to it, and the
//! reliability-tiered **peer cache** tracks which remote Managers are usable
//! providers of which services. The allocation controller resolves a service
//! hash to a provider through cache, discovery, and on-demand allocation.

pub use svcfab_common as common;
pub use svcfab_fabric as fabric;
pub use svcfab_metrics as metrics;
pub use svcfab_node as node;
