//! # Vouch Transport
//!
//! Network adapter abstraction for the Vouch authenticated-sync layer.
//!
//! A [`NetworkAdapter`] carries opaque frames between peers and reports
//! lifecycle changes as [`AdapterEvent`]s. The authenticated layer wraps a
//! base adapter and presents the same trait upward, so a repository cannot
//! tell a wrapped adapter from a bare one.
//!
//! The base transport is assumed to deliver frames reliably and in order
//! between two peers; reliability and reconnection are its concern, not this
//! crate's.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod memory;

pub use adapter::{AdapterEvent, NetworkAdapter, PeerId, TransportError, TransportResult};
pub use memory::MemoryAdapter;
