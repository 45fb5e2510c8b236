//! In-memory storage for callplane.
//!
//! [`MemoryStore`] implements every storage port from [`cp_core::store`] over
//! lock-protected maps. It is seeded from a TOML file ([`SeedData`]) and
//! stands in for the relational store in the agent binary and in tests.

#![forbid(unsafe_code)]

mod memory;
mod seed;

pub use memory::MemoryStore;
pub use seed::{BlocklistRow, DidRow, SeedData, SeedError};
