//! Network graph, bandwidth allotments, and constrained path search for the
//! reservation controller.
//!
//! The graph is owned by exactly one actor (the network manager); nothing in
//! this crate is shared or locked. Time is unix seconds passed explicitly.

use thiserror::Error;

pub mod allotment;
pub mod graph;
pub mod host;
pub mod link;
pub mod path;
pub mod switch;

pub use allotment::{Allotment, QueueDir, QueueShare, TimeSlice, PRIORITY_QUEUE_NUM};
pub use graph::{
    LinkSpec, Network, QueueEntry, ReserveOutcome, ReserveRequest, TopoSnapshot, DEFAULT_CAPACITY,
};
pub use host::{Attachment, Host};
pub use link::{Link, Spq};
pub use path::{Hop, Path, PathPushPlan};
pub use switch::Switch;

/// Errors from graph and reservation operations.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("no path with sufficient capacity between {h1} and {h2}")]
    NoPath { h1: String, h2: String },

    #[error("reservation already committed: {0}")]
    AlreadyReserved(String),

    #[error("unknown reservation: {0}")]
    UnknownReservation(String),

    #[error("percentage out of range: {0}")]
    InvalidCap(u32),

    #[error("path references a link the graph no longer has: {0}")]
    MissingLink(String),
}
