//! # Filegrid Core Types
//!
//! Shared vocabulary for the filegrid platform. Every service crate speaks in
//! terms of the types defined here: the authoritative file record, storage
//! element registrations and capacity records, finalize transactions, cleanup
//! queue entries, and the file lifecycle events that flow from the control
//! plane to the query service.
//!
//! This crate deliberately carries no runtime machinery — no locks, no tasks,
//! no I/O beyond configuration loading. It is the leaf of the workspace
//! dependency graph so that the service crates can share wire types without
//! pulling each other in.

mod config;
mod events;
mod types;

pub use config::*;
pub use events::*;
pub use types::*;
