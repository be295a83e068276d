//! `Replica`: the public handle around a `Store` plus its `SyncDriver`,
//! generic over the `Persistence`/`Transport` backends the embedding
//! application supplies (§6).

use std::sync::Arc;

use async_trait::async_trait;
use osmosis_core::action::Action;
use osmosis_core::config::StoreConfig;
use osmosis_core::contract::{
    PeerEvent, Persistence, RpcMethod, RpcResponse, StateHash, Transport,
};
use osmosis_core::error::{ActionFailure, OsmosisError, OsmosisResult, ProtocolError};
use osmosis_core::id::Uuid;
use osmosis_core::json::{Json, PathArray};
use osmosis_core::store::Store;
use osmosis_core::sync::SyncDriver;
use tokio::sync::Mutex;

use crate::memory::RpcEndpoint;

/// One peer's full replica: the document, its operation log, and the sync
/// session state machine that converges it with other peers. `uuid()`
/// identifies this replica as an author and, in the in-memory transport,
/// as a network address.
pub struct Replica<P: Persistence, T: Transport> {
    driver: SyncDriver<P, T>,
}

impl<P, T> Replica<P, T>
where
    P: Persistence + Send + Sync + 'static,
    T: Transport + Send + Sync + 'static,
{
    /// Loads (or initializes) `persistence` and wires it to `transport`.
    pub async fn new(config: StoreConfig, persistence: P, transport: Arc<T>) -> OsmosisResult<Self> {
        let session_timeouts = config.session;
        let store = Store::new(config, persistence).await?;
        let self_peer = store.uuid;
        let driver = SyncDriver::new(Arc::new(Mutex::new(store)), transport, self_peer, session_timeouts);
        Ok(Replica { driver })
    }

    pub fn uuid(&self) -> Uuid {
        self.driver.self_peer()
    }

    /// Local mutation entry point (§4.6/§6): compiles and fans the path
    /// out, applies each resulting op, then fires Live Update (§4.8) to
    /// every paired peer. Blocks while a sync session with any peer is in
    /// progress.
    pub async fn dispatch(&self, action: Action) -> (Vec<PathArray>, Vec<ActionFailure>) {
        self.driver.dispatch(action).await
    }

    pub async fn query_once(&self, path: &str) -> OsmosisResult<Vec<Json>> {
        self.driver.store().lock().await.query_once(path)
    }

    pub async fn subscribe(
        &self,
        path: &str,
        callback: impl Fn(Vec<Json>) + Send + Sync + 'static,
    ) -> OsmosisResult<u64> {
        self.driver.store().lock().await.subscribe(path, callback)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.driver.store().lock().await.unsubscribe(id);
    }

    pub async fn root(&self) -> Json {
        self.driver.store().lock().await.root().clone()
    }

    pub async fn state_hash(&self) -> StateHash {
        self.driver.store().lock().await.state_hash()
    }

    pub async fn is_syncing(&self) -> bool {
        self.driver.is_syncing().await
    }

    /// Feeds one inbound peer/RPC event to the sync driver (§6). The
    /// embedding application's transport glue is expected to call this for
    /// every event it receives for this replica's peer id.
    pub async fn handle_peer_event(&self, event: PeerEvent) {
        self.driver.handle_peer_event(event).await;
    }
}

impl<P, T> std::fmt::Debug for Replica<P, T>
where
    P: Persistence,
    T: Transport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica").field("uuid", &self.uuid()).finish_non_exhaustive()
    }
}

#[async_trait]
impl<P, T> RpcEndpoint for Replica<P, T>
where
    P: Persistence + Send + Sync + 'static,
    T: Transport + Send + Sync + 'static,
{
    async fn rpc(&self, from: Uuid, method: RpcMethod) -> Result<RpcResponse, ProtocolError> {
        self.driver.rpc(from, method).await
    }
}

/// Convenience helper mirroring how a real transport reports a failed
/// action batch back to a caller: the first failure wins, if any.
pub fn first_failure(failures: &[ActionFailure]) -> Option<OsmosisError> {
    failures.first().map(|f| OsmosisError::action(f.path.clone(), f.message.clone()))
}
