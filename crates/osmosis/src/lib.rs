//! `osmosis`: a peer-to-peer, eventually-consistent JSON data store. Each
//! replica holds a full copy of a shared JSON document, applies local
//! mutations immediately, and background-syncs with other peers over an
//! authenticated RPC transport (supplied by the embedding application —
//! see [`osmosis_core::contract`]). Any two peers that exchange their
//! operation logs converge to byte-identical state.
//!
//! This crate is a thin facade over `osmosis-core`, which implements the
//! operation log, the anchored-path data model, the save-point index, the
//! path-language query engine, and the sync protocol. Depend on this
//! crate, not `osmosis-core` directly.

pub mod memory;
mod replica;

pub use memory::{InMemoryNetwork, InMemoryPersistence, InMemoryTransport, RpcEndpoint};
pub use replica::{first_failure, Replica};

pub use osmosis_core::action::{Action, DispatchAction};
pub use osmosis_core::config::{SessionTimeouts, StoreConfig};
pub use osmosis_core::contract::{
    PeerEvent, Persistence, PersistedSavePoint, PersistedState, RpcMethod, RpcResponse, StateHash,
    Transport,
};
pub use osmosis_core::error::{ActionFailure, ExprError, OsmosisError, OsmosisResult, ProtocolError};
pub use osmosis_core::id::{Timestamp, Uuid};
pub use osmosis_core::json::Json;
pub use osmosis_core::op::{NetworkAction, Op};
pub use osmosis_core::path;
