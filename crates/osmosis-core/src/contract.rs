//! External interfaces (§6): the narrow traits `osmosis_core` talks to
//! instead of implementing peer discovery, pairing, transport encryption,
//! or a persistence engine itself. `osmosis_core` ships no implementation
//! of either trait; the `osmosis` crate provides in-memory ones for tests
//! and single-process demos.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::{OsmosisResult, ProtocolError};
use crate::id::{Timestamp, Uuid};
use crate::op::Op;

/// The rolling state-summary hash (§4.7): independent of payload, so peers
/// that agree on the set and order of ops agree on hash.
pub type StateHash = [u8; 32];

pub const ZERO_STATE_HASH: StateHash = [0u8; 32];

/// Everything `Persistence::load` hands back at startup. Save points are
/// deliberately not part of the loaded payload (see `PersistedSavePoint`
/// below): `osmosis_core` rebuilds the save-point index deterministically
/// by replaying `ops`, rather than trusting a separately persisted
/// snapshot cache of the (non-serializable-by-design) `IdMappedJson`
/// structural mirror.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub uuid: Option<Uuid>,
    pub ops: Vec<Op>,
}

/// Lightweight record of a save point's position, passed to
/// `Persistence::add_save_point`/`delete_save_point` so a backend can keep
/// its own index in sync with the in-memory `SavePointIndex`'s
/// exponential-collapse policy, without this crate needing to serialize
/// the full document snapshot that backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedSavePoint {
    pub timestamp: Timestamp,
    pub width: u32,
}

/// The persistence contract (§6). Single-writer with a write-coalescing
/// discipline is expected of the implementation (a `Pending` write
/// supersedes an in-flight `Writing`); `osmosis_core` only ever calls
/// these methods sequentially from the one logical task that owns the
/// `Store`, so it never needs its own locking around them.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> OsmosisResult<PersistedState>;
    async fn add_op(&self, op: &Op) -> OsmosisResult<()>;
    async fn add_save_point(&self, save_point: PersistedSavePoint) -> OsmosisResult<()>;
    async fn delete_save_point(&self, timestamp: Timestamp) -> OsmosisResult<()>;
    async fn delete_everything_after(&self, timestamp: Timestamp) -> OsmosisResult<()>;
}

/// The five RPC methods a sync session exchanges (§4.7), plus the
/// out-of-session `LiveUpdate` fast path. `session` ids are carried inside
/// each variant that needs one rather than as a separate envelope field,
/// since `LiveUpdate` has none.
#[derive(Debug, Clone)]
pub enum RpcMethod {
    StateSummary {
        session: Uuid,
        hash: StateHash,
        latest_indexes: FxHashMap<Uuid, u32>,
    },
    SessionUpdate {
        session: Uuid,
        ops: Vec<Op>,
    },
    FindLastSharedHistory {
        session: Uuid,
        /// `(hash, id)` for each local save point, oldest first.
        save_points: Vec<(StateHash, Uuid)>,
    },
    EndSession {
        session: Uuid,
    },
    LiveUpdate {
        ops: Vec<Op>,
    },
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::StateSummary { .. } => "stateSummary",
            RpcMethod::SessionUpdate { .. } => "sessionUpdate",
            RpcMethod::FindLastSharedHistory { .. } => "findLastSharedHistory",
            RpcMethod::EndSession { .. } => "endSession",
            RpcMethod::LiveUpdate { .. } => "liveUpdate",
        }
    }
}

/// Responses for the methods that have one (`findLastSharedHistory`,
/// `liveUpdate`); the rest reply with `None`.
#[derive(Debug, Clone)]
pub enum RpcResponse {
    None,
    SharedHistoryId(Option<Uuid>),
    Hash(StateHash),
}

/// The transport contract (§6): an authenticated, bidirectional RPC
/// channel keyed by peer id. `osmosis_core` never listens on a socket
/// itself — inbound calls and peer lifecycle events arrive as
/// `PeerEvent`s that the embedding application (or, for tests, the
/// `osmosis` crate's in-memory transport) pushes into the channel handed
/// back by `events()`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call_method(
        &self,
        peer: Uuid,
        method: RpcMethod,
        fire_and_forget: bool,
    ) -> Result<RpcResponse, ProtocolError>;

    /// Every peer this replica is currently paired with and reachable by,
    /// in no particular order.
    async fn paired_peers(&self) -> Vec<Uuid>;
}

/// Peer lifecycle and inbound-RPC events (§6). `Rpc` carries a
/// `oneshot::Sender` so the session/store task can reply asynchronously
/// without the transport blocking on it.
#[derive(Debug)]
pub enum PeerEvent {
    PeerAppeared(Uuid),
    PeerConnected(Uuid),
    PeerDisconnected(Uuid),
    PeerDisappeared(Uuid),
    PairRequest(Uuid),
    PairResponse { peer: Uuid, accepted: bool },
    ConfigUpdated,
    Start,
    BeforeStop,
    Rpc {
        peer: Uuid,
        method: RpcMethod,
        respond_to: oneshot::Sender<Result<RpcResponse, ProtocolError>>,
    },
}
