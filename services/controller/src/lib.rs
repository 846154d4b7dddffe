//! Tegu reservation controller.
//!
//! Five cooperating actors, each owning private state and talking only
//! through typed mailbox messages:
//!
//! - [`reservation::ReservationManager`]: the pledge inventory, lifecycle,
//!   checkpointing, and the scheduler ticks that push flow-mods.
//! - [`network::NetworkManager`]: the fabric graph, time-sliced bandwidth
//!   allotments, path finding, queue plans.
//! - [`flowqueue::FlowQueueManager`]: structured requests in, agent wire
//!   strings out.
//! - [`agents::AgentManager`]: the TCP pool of compute-node agents.
//! - [`ticker`]: the periodic event source driving the others.

pub mod agents;
pub mod checkpoint;
pub mod config;
pub mod flowqueue;
pub mod network;
pub mod oracle;
pub mod reservation;
pub mod ticker;
pub mod wire;

/// Wall clock in unix seconds. Core arithmetic takes explicit timestamps;
/// only the actor loops sample the clock.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
