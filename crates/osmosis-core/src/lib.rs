//! `osmosis-core` is the internal engine behind the `osmosis` crate: the
//! operation log, path language, action applier, id-mapped document, and
//! sync protocol that give Osmosis its peer-to-peer, eventually-consistent
//! behavior. Do not depend on it directly — its API is not stable and may
//! change between patch releases. Depend on `osmosis` instead.

pub mod action;
pub mod config;
pub mod contract;
pub mod error;
pub mod id;
pub mod idmap;
pub mod json;
pub mod op;
pub mod oplog;
pub mod path;
pub mod queue;
pub mod savepoint;
pub mod store;
pub mod sync;

pub use error::{OsmosisError, OsmosisResult};
pub use id::{Timestamp, Uuid};
pub use json::Json;
