//! Concurrent in-memory reputation scoring engine for IPv4 addresses.
//!
//! The engine keeps a signed score per address across the full IPv4
//! space, sharded into a bitmap filter, a /16 directory, and dense
//! /24 score blocks (see [`engine::ScoreEngine`]). Reads are lock-free;
//! writes take only the affected /24's lock.

pub mod address;
pub mod bitmap;
pub mod block;
pub mod bulk;
pub mod directory;
pub mod engine;
pub mod error;
pub mod snapshot;

pub use address::{display_ipv4, parse_ipv4, Ipv4};
pub use bulk::{bulk_load, bulk_load_buffer};
pub use engine::{BulkLoadResult, ScoreEngine};
pub use error::{Result, ScoreEngineError};
pub use snapshot::{load as load_snapshot, save as save_snapshot};
