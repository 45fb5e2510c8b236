//! Test support for callplane crates.
//!
//! - [`fixtures`]: node builders with predictable addresses.
//! - [`stores`]: storage doubles that fail, stall, or count calls.
//! - [`logging`]: test tracing setup and an in-memory log capture.

#![forbid(unsafe_code)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod logging;
pub mod stores;

pub use fixtures::{media_relay, number, rtc_media_relay, sip_router};
pub use logging::{LogCapture, init_test_tracing};
pub use stores::{CountingStore, StallingStore, UnavailableStore};
