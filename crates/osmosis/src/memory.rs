//! In-process implementations of the `Persistence` and `Transport`
//! contracts (§6), for tests and single-process demos. Neither is meant
//! for production use: `InMemoryPersistence` keeps everything in a `Vec`
//! with no durability, and `InMemoryNetwork` wires peers together by
//! direct function call instead of a real wire protocol.

use std::sync::Arc;

use async_trait::async_trait;
use osmosis_core::contract::{
    PersistedSavePoint, PersistedState, Persistence, RpcMethod, RpcResponse, Transport,
};
use osmosis_core::error::{OsmosisResult, ProtocolError};
use osmosis_core::id::{Timestamp, Uuid};
use osmosis_core::op::Op;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

/// An in-memory `Persistence` backend. `uuid` is fixed at construction so
/// the caller can hand a matching `InMemoryTransport` to the same replica
/// before either exists as a full `Replica`.
#[derive(Clone)]
pub struct InMemoryPersistence {
    uuid: Uuid,
    ops: Arc<RwLock<Vec<Op>>>,
}

impl InMemoryPersistence {
    pub fn new(uuid: Uuid) -> Self {
        InMemoryPersistence { uuid, ops: Arc::new(RwLock::new(Vec::new())) }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load(&self) -> OsmosisResult<PersistedState> {
        Ok(PersistedState { uuid: Some(self.uuid), ops: self.ops.read().clone() })
    }

    async fn add_op(&self, op: &Op) -> OsmosisResult<()> {
        self.ops.write().push(op.clone());
        Ok(())
    }

    async fn add_save_point(&self, _save_point: PersistedSavePoint) -> OsmosisResult<()> {
        Ok(())
    }

    async fn delete_save_point(&self, _timestamp: Timestamp) -> OsmosisResult<()> {
        Ok(())
    }

    async fn delete_everything_after(&self, timestamp: Timestamp) -> OsmosisResult<()> {
        self.ops.write().retain(|op| op.timestamp <= timestamp);
        Ok(())
    }
}

/// Addressable by an `InMemoryTransport` to deliver an inbound RPC without
/// either side needing to know the other's concrete `Persistence`/
/// `Transport` type parameters. `Replica<P, T>` implements this so it can
/// be registered in an `InMemoryNetwork` as a trait object.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    async fn rpc(&self, from: Uuid, method: RpcMethod) -> Result<RpcResponse, ProtocolError>;
}

#[derive(Default)]
struct Registry {
    endpoints: FxHashMap<Uuid, Arc<dyn RpcEndpoint>>,
    pairings: FxHashMap<Uuid, FxHashSet<Uuid>>,
}

/// A shared switchboard that a test or demo uses to connect several
/// `Replica`s in one process: `transport_for(id)` hands out a `Transport`
/// that routes `call_method` straight into whatever endpoint is registered
/// under the target peer id.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    registry: Arc<RwLock<Registry>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, endpoint: Arc<dyn RpcEndpoint>) {
        self.registry.write().endpoints.insert(id, endpoint);
    }

    pub fn unregister(&self, id: Uuid) {
        self.registry.write().endpoints.remove(&id);
    }

    /// Pairs two peers symmetrically: each appears in the other's
    /// `paired_peers()` list, and Live Update / sync sessions can address
    /// each other.
    pub fn pair(&self, a: Uuid, b: Uuid) {
        let mut reg = self.registry.write();
        reg.pairings.entry(a).or_default().insert(b);
        reg.pairings.entry(b).or_default().insert(a);
    }

    pub fn unpair(&self, a: Uuid, b: Uuid) {
        let mut reg = self.registry.write();
        if let Some(set) = reg.pairings.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(set) = reg.pairings.get_mut(&b) {
            set.remove(&a);
        }
    }

    pub fn transport_for(&self, id: Uuid) -> InMemoryTransport {
        InMemoryTransport { self_id: id, registry: self.registry.clone() }
    }
}

pub struct InMemoryTransport {
    self_id: Uuid,
    registry: Arc<RwLock<Registry>>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn call_method(
        &self,
        peer: Uuid,
        method: RpcMethod,
        _fire_and_forget: bool,
    ) -> Result<RpcResponse, ProtocolError> {
        let endpoint = self.registry.read().endpoints.get(&peer).cloned();
        match endpoint {
            Some(endpoint) => endpoint.rpc(self.self_id, method).await,
            None => Err(ProtocolError::Rpc(format!("peer {peer} is not reachable"))),
        }
    }

    async fn paired_peers(&self) -> Vec<Uuid> {
        self.registry
            .read()
            .pairings
            .get(&self.self_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
