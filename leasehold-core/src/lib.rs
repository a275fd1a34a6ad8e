//! # leasehold-core
//!
//! Lease and lock coordination over a shared relational store.
//! Provides single-owner leases with fencing tokens, in-process TTL expiry,
//! periodic reconciliation across server replicas, and a client-side runner
//! that holds a lease for the lifetime of a process.

pub mod burglar;
pub mod client;
pub mod error;
pub mod handler;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock_pick;
pub mod repository;
pub mod runner;
pub mod signal;
pub mod types;

pub use error::{LockError, LockResult, StoreError, StoreResult};

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod handler_test;
