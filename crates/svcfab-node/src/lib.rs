//! svcfab Node Roles
//!
//! The stream handlers a node registers with the overlay when it plays a
//! role:
//!
//! - **Allocator** ([`AllocatorHandler`]): listens on the allocation
//!   protocol and spawns local service instances on command, answering with
//!   the new instance's `host:port`.
//! - **Manager** ([`ManagerHandler`]): listens on the request-forward
//!   protocol in front of a running service instance, proxying one embedded
//!   HTTP/1.1 request per stream to it and relaying the response verbatim.
//!
//! Handlers are capability functions bound to local state captured at
//! registration time - the spawner for the allocator, the fronted service
//! address for the manager. The overlay traps handler panics, so a failure
//! here never takes the process down.

pub mod allocator;
pub mod manager;
pub mod spawner;

pub use allocator::AllocatorHandler;
pub use manager::ManagerHandler;
pub use spawner::{ProcessSpawner, Spawner};
