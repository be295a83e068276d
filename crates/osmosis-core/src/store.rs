//! Store (§4.6): orchestrates dispatch, merge-ops, query subscriptions, and
//! delegates document persistence to the `Persistence` backend. This is the
//! single logical task spec.md §5 describes — no internal locking, because
//! only this owner ever mutates the op log or document state.

use serde_json::Value as Json;

use crate::action::{Action, DispatchAction};
use crate::config::StoreConfig;
use crate::contract::{Persistence, PersistedSavePoint};
use crate::error::{ActionFailure, OsmosisError, OsmosisResult};
use crate::id::{Timestamp, Uuid};
use crate::idmap::IdMappedJson;
use crate::json::PathArray;
use crate::op::{AnchoredAction, NetworkAction, Op, OpKind};
use crate::oplog::OperationLog;
use crate::path;
use crate::savepoint::SavePointIndex;

/// Whether `apply_op` persists/snapshots an op unconditionally (`Always`,
/// used while replaying during a merge) or only when it actually changed
/// something (`WhenChanged`, used for local dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Always,
    WhenChanged,
}

struct Subscription {
    id: u64,
    path: path::CompiledPath,
    callback: Box<dyn Fn(Vec<Json>) + Send + Sync>,
    last_emitted: Option<Vec<Json>>,
}

pub struct Store<P: Persistence> {
    pub uuid: Uuid,
    config: StoreConfig,
    persistence: P,
    ops: OperationLog,
    state: IdMappedJson,
    save_points: SavePointIndex,
    subscriptions: Vec<Subscription>,
    next_sub_id: u64,
}

impl<P: Persistence> Store<P> {
    /// Loads persisted ops (if any) and rebuilds state by replaying them
    /// from the zero save point, exactly as `merge_ops` would. Save points
    /// are not loaded from storage (see `PersistedState`'s doc comment);
    /// they're rebuilt deterministically as replay proceeds.
    pub async fn new(config: StoreConfig, persistence: P) -> OsmosisResult<Self> {
        let persisted = persistence
            .load()
            .await
            .map_err(|e| OsmosisError::invariant(format!("failed to load persisted state: {e}")))?;
        let uuid = persisted.uuid.unwrap_or_default();
        let mut store = Store {
            uuid,
            config,
            persistence,
            ops: OperationLog::new(),
            state: IdMappedJson::new(Json::Object(Default::default())),
            save_points: SavePointIndex::new(IdMappedJson::new(Json::Object(Default::default()))),
            subscriptions: Vec::new(),
            next_sub_id: 0,
        };
        for op in persisted.ops {
            store.ops.push(op);
        }
        let all_ops = store.ops.ops().to_vec();
        for op in &all_ops {
            if let Err(fail) = store.apply_op(op, SaveMode::Always, true).await {
                tracing::warn!(?fail, "discarding unreplayable op from persisted log");
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Json {
        &self.state.root
    }

    pub fn ops(&self) -> &[Op] {
        self.ops.ops()
    }

    pub fn save_points(&self) -> &SavePointIndex {
        &self.save_points
    }

    /// A fingerprint over the full op log, independent of payload: see
    /// `crate::sync::state_hash`.
    pub fn state_hash(&self) -> crate::contract::StateHash {
        crate::sync::state_hash(self.ops.ops())
    }

    pub fn latest_indexes(&self) -> rustc_hash::FxHashMap<Uuid, u32> {
        let mut out: rustc_hash::FxHashMap<Uuid, u32> = rustc_hash::FxHashMap::default();
        for op in self.ops.ops() {
            let entry = out.entry(op.timestamp.author).or_insert(0);
            if op.timestamp.index > *entry {
                *entry = op.timestamp.index;
            }
        }
        out
    }

    pub fn query_once(&self, path_str: &str) -> OsmosisResult<Vec<Json>> {
        let compiled = path::compile(path_str).map_err(|e| OsmosisError::action(vec![], e.to_string()))?;
        path::query_values(&self.state.root, &compiled).map_err(|e| OsmosisError::action(vec![], e.to_string()))
    }

    /// Registers `callback` to be invoked whenever a change under `path`'s
    /// results differ from the last emitted value. Fires once immediately
    /// if the subscription is meant to seed its baseline silently — here
    /// we just record the current value as the baseline without calling
    /// `callback`, so the caller only hears about *changes*.
    pub fn subscribe(
        &mut self,
        path_str: &str,
        callback: impl Fn(Vec<Json>) + Send + Sync + 'static,
    ) -> OsmosisResult<u64> {
        let compiled = path::compile(path_str).map_err(|e| OsmosisError::action(vec![], e.to_string()))?;
        let baseline = path::query_values(&self.state.root, &compiled).unwrap_or_default();
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        self.subscriptions.push(Subscription {
            id,
            path: compiled,
            callback: Box::new(callback),
            last_emitted: Some(baseline),
        });
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscriptions.retain(|s| s.id != id);
    }

    /// Local mutation entry point (§4.6). Compiles the path(s), anchors
    /// each matched slot, assigns fresh timestamps, applies each via
    /// `apply_op(WhenChanged)`, and persists.
    pub async fn dispatch(&mut self, action: Action) -> (Vec<PathArray>, Vec<ActionFailure>) {
        let _span = tracing::debug_span!("dispatch").entered();
        match action {
            Action::Network(net) => {
                self.apply_network_action(&net);
                (Vec::new(), Vec::new())
            }
            Action::Scalar(scalar) => {
                let result = self.dispatch_scalar(scalar).await;
                self.compact_if_needed().await;
                result
            }
            Action::Transaction(batch) => {
                let result = self.dispatch_transaction(batch).await;
                self.compact_if_needed().await;
                result
            }
        }
    }

    async fn dispatch_scalar(&mut self, action: DispatchAction) -> (Vec<PathArray>, Vec<ActionFailure>) {
        let compiled = match path::compile(action.path()) {
            Ok(c) => c,
            Err(e) => return (Vec::new(), vec![ActionFailure { path: vec![], message: e.to_string() }]),
        };
        let slots = match path::query_slots(&self.state.root, &compiled) {
            Ok(s) => s,
            Err(e) => return (Vec::new(), vec![ActionFailure { path: vec![], message: e.to_string() }]),
        };
        if slots.is_empty() {
            return (
                Vec::new(),
                vec![ActionFailure {
                    path: vec![],
                    message: format!("path {} matched no slots", action.path()),
                }],
            );
        }
        let mut changed_all = Vec::new();
        let mut failures = Vec::new();
        for slot in slots {
            let destination = match action.destination() {
                None => None,
                Some(dest_str) => match self.resolve_singular(dest_str) {
                    Ok(p) => Some(p),
                    Err(fail) => {
                        failures.push(fail);
                        continue;
                    }
                },
            };
            let anchored = self.anchor(&action, slot, destination);
            let ts = Timestamp::new(self.uuid, self.ops.next_index(self.uuid));
            let op = Op::new(ts, OpKind::Scalar(anchored));
            match self.apply_op(&op, SaveMode::WhenChanged, false).await {
                Ok(changed) => changed_all.extend(changed),
                Err(fail) => failures.push(fail),
            }
        }
        (changed_all, failures)
    }

    async fn dispatch_transaction(&mut self, batch: Vec<DispatchAction>) -> (Vec<PathArray>, Vec<ActionFailure>) {
        if batch.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let mut anchored_actions = Vec::with_capacity(batch.len());
        for action in &batch {
            let slot = match self.resolve_singular(action.path()) {
                Ok(p) => p,
                Err(fail) => return (Vec::new(), vec![fail]),
            };
            let destination = match action.destination() {
                None => None,
                Some(dest_str) => match self.resolve_singular(dest_str) {
                    Ok(p) => Some(p),
                    Err(fail) => return (Vec::new(), vec![fail]),
                },
            };
            anchored_actions.push(self.anchor(action, slot, destination));
        }
        let n = batch.len() as u32;
        let start = self.ops.next_index(self.uuid);
        let base_ts = Timestamp::new(self.uuid, start + n - 1);
        let op = Op::new(base_ts, OpKind::Transaction(anchored_actions));
        match self.apply_op(&op, SaveMode::WhenChanged, false).await {
            Ok(changed) => (changed, Vec::new()),
            Err(fail) => (Vec::new(), vec![fail]),
        }
    }

    fn resolve_singular(&self, path_str: &str) -> Result<PathArray, ActionFailure> {
        let compiled = path::compile(path_str)
            .map_err(|e| ActionFailure { path: vec![], message: e.to_string() })?;
        let mut slots = path::query_slots(&self.state.root, &compiled)
            .map_err(|e| ActionFailure { path: vec![], message: e.to_string() })?;
        if slots.len() != 1 {
            return Err(ActionFailure {
                path: vec![],
                message: format!("path {path_str} must resolve to exactly one slot, found {}", slots.len()),
            });
        }
        Ok(slots.remove(0))
    }

    fn anchor(&self, action: &DispatchAction, path: PathArray, destination: Option<PathArray>) -> AnchoredAction {
        let op_path = self.state.anchor_path_to_id(&path);
        let dest_op_path = || self.state.anchor_path_to_id(destination.as_ref().expect("destination required"));
        match action {
            DispatchAction::Set { payload, .. } => AnchoredAction::Set { path: op_path, payload: payload.clone() },
            DispatchAction::Delete { .. } => AnchoredAction::Delete { path: op_path },
            DispatchAction::Add { payload, .. } => AnchoredAction::Add { path: op_path, payload: payload.clone() },
            DispatchAction::Multiply { payload, .. } => {
                AnchoredAction::Multiply { path: op_path, payload: payload.clone() }
            }
            DispatchAction::InitArray { .. } => AnchoredAction::InitArray { path: op_path },
            DispatchAction::InitObject { .. } => AnchoredAction::InitObject { path: op_path },
            DispatchAction::InsertBefore { payload, .. } => {
                AnchoredAction::InsertBefore { path: op_path, payload: payload.clone() }
            }
            DispatchAction::InsertAfter { payload, .. } => {
                AnchoredAction::InsertAfter { path: op_path, payload: payload.clone() }
            }
            DispatchAction::InsertUnique { payload, .. } => {
                AnchoredAction::InsertUnique { path: op_path, payload: payload.clone() }
            }
            DispatchAction::Move { .. } => AnchoredAction::Move { path: op_path, destination: dest_op_path() },
            DispatchAction::Copy { .. } => AnchoredAction::Copy { path: op_path, destination: dest_op_path() },
        }
    }

    fn apply_network_action(&mut self, action: &NetworkAction) {
        match action {
            NetworkAction::RequestPair { peer } => {
                tracing::info!(%peer, "requestPair dispatched (pairing layer lives outside this crate)");
            }
            NetworkAction::AcceptPair { peer } => {
                tracing::info!(%peer, "acceptPair dispatched (pairing layer lives outside this crate)");
            }
            NetworkAction::RejectPair { peer } => {
                tracing::info!(%peer, "rejectPair dispatched (pairing layer lives outside this crate)");
            }
            NetworkAction::Unpair { peer } => {
                tracing::info!(%peer, "unpair: no-op, not implemented upstream either (see DESIGN.md)");
            }
            NetworkAction::SetVisibleToPeers(visible) => {
                tracing::info!(visible, "setVisibleToPeers: no-op, owned by the pairing layer");
            }
            NetworkAction::SetSyncEnabled(enabled) => {
                tracing::info!(enabled, "setSyncEnabled: no-op, owned by the pairing layer");
            }
        }
    }

    /// Applies one op to `state`. Transactions roll back atomically on the
    /// first sub-action failure; their nested scalars get distinct
    /// timestamps derived from the transaction's own (highest) index
    /// without needing to store one per action (§4.4).
    fn apply_kind_to_state(&mut self, op: &Op) -> Result<Vec<PathArray>, ActionFailure> {
        match &op.kind {
            OpKind::Scalar(action) => self.state.apply(op.timestamp, action),
            OpKind::Transaction(actions) => self.apply_transaction_to_state(op.timestamp, actions),
            OpKind::Network(action) => {
                self.apply_network_action(action);
                Ok(Vec::new())
            }
        }
    }

    fn apply_transaction_to_state(
        &mut self,
        base_ts: Timestamp,
        actions: &[AnchoredAction],
    ) -> Result<Vec<PathArray>, ActionFailure> {
        let snapshot = self.state.clone();
        let n = actions.len() as u32;
        let mut changed = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            let sub_ts = Timestamp::new(base_ts.author, base_ts.index - (n - 1) + i as u32);
            match self.state.apply(sub_ts, action) {
                Ok(c) => changed.extend(c),
                Err(fail) => {
                    self.state = snapshot;
                    return Err(fail);
                }
            }
        }
        Ok(changed)
    }

    /// The shared engine behind local dispatch and merge replay (§4.6).
    /// `already_logged` is true only during merge replay, where the op is
    /// already present in `self.ops` (inserted before the rewind).
    pub(crate) async fn apply_op(
        &mut self,
        op: &Op,
        mode: SaveMode,
        already_logged: bool,
    ) -> Result<Vec<PathArray>, ActionFailure> {
        let changed = self.apply_kind_to_state(op)?;
        let keep = mode == SaveMode::Always || !changed.is_empty();
        if keep {
            if !already_logged {
                self.ops.push(op.clone());
            }
            if let Err(e) = self.persistence.add_op(op).await {
                tracing::warn!(error = %e, timestamp = ?op.timestamp, "persistence.add_op failed");
            }
            let before = self.save_points.points().len();
            self.save_points.maybe_snapshot(op.timestamp, || self.state.clone());
            if self.save_points.points().len() != before {
                let latest = self.save_points.latest();
                if let Err(e) = self
                    .persistence
                    .add_save_point(PersistedSavePoint { timestamp: latest.timestamp, width: latest.width })
                    .await
                {
                    tracing::warn!(error = %e, "persistence.add_save_point failed");
                }
            }
        }
        if !changed.is_empty() {
            self.notify_subscriptions(&changed);
        }
        Ok(changed)
    }

    fn notify_subscriptions(&mut self, changed: &[PathArray]) {
        for sub in &mut self.subscriptions {
            let relevant = changed
                .iter()
                .any(|c| path::path_intersects_prefix(&self.state.root, &sub.path, c));
            if !relevant {
                continue;
            }
            match path::query_values(&self.state.root, &sub.path) {
                Ok(values) => {
                    if sub.last_emitted.as_ref() != Some(&values) {
                        let values_for_callback = values.clone();
                        let callback = &sub.callback;
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            callback(values_for_callback)
                        }));
                        if result.is_err() {
                            tracing::error!("subscription callback panicked, continuing");
                        }
                        sub.last_emitted = Some(values);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "subscription re-evaluation failed"),
            }
        }
    }

    /// Merges a foreign peer's ops into the log (§4.6). Rewinds to the
    /// greatest save point covering the earliest newly-inserted timestamp,
    /// truncates the save-point list and asks `Persistence` to drop
    /// everything after that point, then re-applies every op from there
    /// forward (`apply_op(Always)`), which re-persists and re-snapshots as
    /// it goes.
    pub async fn merge_ops(&mut self, foreign_ops: Vec<Op>) -> (Vec<PathArray>, Vec<ActionFailure>) {
        let _span = tracing::debug_span!("merge_ops", count = foreign_ops.len()).entered();
        let mut new_ops: Vec<Op> = foreign_ops
            .into_iter()
            .filter(|op| !self.ops.contains(op.timestamp))
            .collect();
        if new_ops.is_empty() {
            return (Vec::new(), Vec::new());
        }
        new_ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let earliest = new_ops[0].timestamp;
        for op in new_ops {
            self.ops.insert_sorted(op);
        }

        let sp_index = self.save_points.covering_index(earliest);
        let sp_timestamp = self.save_points.points()[sp_index].timestamp;
        self.state = self.save_points.points()[sp_index].state.clone();
        let replay_start = self.ops.first_index_after(sp_timestamp);
        self.save_points.truncate_after(sp_index);
        if let Err(e) = self.persistence.delete_everything_after(sp_timestamp).await {
            tracing::warn!(error = %e, "persistence.delete_everything_after failed");
        }

        let replay_ops: Vec<Op> = self.ops.slice_from(replay_start).to_vec();
        let mut changed_all = Vec::new();
        let mut failures = Vec::new();
        for op in &replay_ops {
            match self.apply_op(op, SaveMode::Always, true).await {
                Ok(changed) => changed_all.extend(changed),
                Err(fail) => {
                    tracing::warn!(?fail, "merge replay: action failed");
                    failures.push(fail);
                }
            }
        }
        self.compact_if_needed().await;
        (changed_all, failures)
    }

    /// History compaction (§9 Open Question): when `ops.len() -
    /// min_history` exceeds `max_history`, drop ops older than the oldest
    /// save point still in the index. Disabled by default
    /// (`max_history == u32::MAX`). Known inefficiency, documented in
    /// DESIGN.md: since `Persistence` only exposes `delete_everything_after`,
    /// compaction wipes the backend entirely and re-adds the retained
    /// suffix, rather than surgically deleting a prefix.
    async fn compact_if_needed(&mut self) {
        if self.config.max_history == u32::MAX {
            return;
        }
        let total = self.ops.len() as u32;
        if total.saturating_sub(self.config.min_history) <= self.config.max_history {
            return;
        }
        let oldest_sp_ts = self.save_points.points()[0].timestamp;
        let keep_from = self.ops.first_index_after(oldest_sp_ts).min(self.ops.len());
        // never drop the op the oldest retained save point is itself stamped at
        let keep_from = if keep_from > 0 && self.ops.ops()[keep_from - 1].timestamp == oldest_sp_ts {
            keep_from - 1
        } else {
            keep_from
        };
        if keep_from == 0 {
            return;
        }
        tracing::info!(dropped = keep_from, "compacting operation log");
        self.ops.drop_before(keep_from);
        if let Err(e) = self.persistence.delete_everything_after(Timestamp::zero()).await {
            tracing::warn!(error = %e, "persistence.delete_everything_after failed during compaction");
            return;
        }
        for op in self.ops.ops().to_vec() {
            if let Err(e) = self.persistence.add_op(&op).await {
                tracing::warn!(error = %e, "persistence.add_op failed during compaction replay");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{PersistedSavePoint as _PersistedSavePoint, PersistedState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct MemoryPersistence {
        ops: Arc<Mutex<Vec<Op>>>,
    }

    #[async_trait]
    impl Persistence for MemoryPersistence {
        async fn load(&self) -> OsmosisResult<PersistedState> {
            Ok(PersistedState { uuid: None, ops: self.ops.lock().clone() })
        }
        async fn add_op(&self, op: &Op) -> OsmosisResult<()> {
            self.ops.lock().push(op.clone());
            Ok(())
        }
        async fn add_save_point(&self, _sp: _PersistedSavePoint) -> OsmosisResult<()> {
            Ok(())
        }
        async fn delete_save_point(&self, _ts: Timestamp) -> OsmosisResult<()> {
            Ok(())
        }
        async fn delete_everything_after(&self, ts: Timestamp) -> OsmosisResult<()> {
            self.ops.lock().retain(|op| op.timestamp <= ts);
            Ok(())
        }
    }

    async fn new_store() -> Store<MemoryPersistence> {
        Store::new(StoreConfig::default(), MemoryPersistence::default()).await.unwrap()
    }

    #[tokio::test]
    async fn s1_single_set() {
        let mut store = new_store().await;
        let (changed, failures) = store
            .dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo".into(), payload: json!("bar") }))
            .await;
        assert!(failures.is_empty());
        assert_eq!(changed.len(), 1);
        assert_eq!(store.query_once("$").unwrap(), vec![json!({"foo": "bar"})]);
        assert_eq!(store.ops().len(), 1);
        assert_eq!(store.ops()[0].timestamp.index, 1);
    }

    #[tokio::test]
    async fn s2_save_point_cadence() {
        let mut store = new_store().await;
        for i in 0..8 {
            store
                .dispatch(Action::Scalar(DispatchAction::Set {
                    path: format!("$.k{i}"),
                    payload: json!(i),
                }))
                .await;
        }
        let widths: Vec<u32> = store.save_points().points().iter().map(|sp| sp.width).collect();
        assert_eq!(widths, vec![4, 4, 4]);
        let timestamps: Vec<u32> = store.save_points().points().iter().map(|sp| sp.timestamp.index).collect();
        assert_eq!(timestamps, vec![0, 4, 8]);
    }

    #[tokio::test]
    async fn s3_anchored_rewrite() {
        let mut store = new_store().await;
        store.dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo".into(), payload: json!(1) })).await;
        store.dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo".into(), payload: json!(2) })).await;
        assert_eq!(store.query_once("$.foo").unwrap(), vec![json!(2)]);
        let second = &store.ops()[1];
        let OpKind::Scalar(AnchoredAction::Set { path, .. }) = &second.kind else { panic!() };
        assert!(path.anchor.is_some());
    }

    #[tokio::test]
    async fn s6_array_delete_shifts_changed() {
        let mut store = new_store().await;
        store
            .dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo".into(), payload: json!([1, 2, 3, 4]) }))
            .await;
        let (changed, failures) = store
            .dispatch(Action::Scalar(DispatchAction::Delete { path: "$.foo[1]".into() }))
            .await;
        assert!(failures.is_empty());
        assert_eq!(store.query_once("$.foo").unwrap(), vec![json!([1, 3, 4])]);
        assert_eq!(changed.len(), 3);
    }

    #[tokio::test]
    async fn s4_unrelated_merge_converges() {
        let mut a = new_store().await;
        let mut b = new_store().await;
        a.dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo".into(), payload: json!(1) })).await;
        a.dispatch(Action::Scalar(DispatchAction::Set { path: "$.bar".into(), payload: json!(2) })).await;
        b.dispatch(Action::Scalar(DispatchAction::Set { path: "$.baz".into(), payload: json!(3) })).await;
        b.dispatch(Action::Scalar(DispatchAction::Set { path: "$.qux".into(), payload: json!(4) })).await;

        a.merge_ops(b.ops().to_vec()).await;
        b.merge_ops(a.ops().to_vec()).await;

        assert_eq!(a.root(), b.root());
        assert_eq!(a.root(), &json!({"foo": 1, "bar": 2, "baz": 3, "qux": 4}));
    }

    #[tokio::test]
    async fn s5_related_merge_picks_higher_total_order() {
        let mut a = new_store().await;
        let mut b = new_store().await;
        a.dispatch(Action::Scalar(DispatchAction::InitObject { path: "$.foo".into() })).await;
        b.dispatch(Action::Scalar(DispatchAction::InitObject { path: "$.foo".into() })).await;
        a.dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo.bar".into(), payload: json!("from-a") })).await;
        b.dispatch(Action::Scalar(DispatchAction::Set { path: "$.foo.bar".into(), payload: json!("from-b") })).await;

        let a_ops = a.ops().to_vec();
        let b_ops = b.ops().to_vec();
        a.merge_ops(b_ops.clone()).await;
        b.merge_ops(a_ops).await;

        assert_eq!(a.root(), b.root());
        // whichever op has the higher total-order timestamp wins; both replicas agree.
        let winner = a.query_once("$.foo.bar").unwrap();
        assert!(winner == vec![json!("from-a")] || winner == vec![json!("from-b")]);
    }

    #[tokio::test]
    async fn transaction_rolls_back_atomically_on_failure() {
        let mut store = new_store().await;
        store.dispatch(Action::Scalar(DispatchAction::Set { path: "$.n".into(), payload: json!("not a number") })).await;
        let (changed, failures) = store
            .dispatch(Action::Transaction(vec![
                DispatchAction::Set { path: "$.ok".into(), payload: json!(1) },
                DispatchAction::Add { path: "$.n".into(), payload: json!(1) },
            ]))
            .await;
        assert!(changed.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(store.query_once("$.ok").unwrap(), Vec::<Json>::new());
    }

    #[tokio::test]
    async fn subscriber_is_notified_only_on_relevant_change() {
        let mut store = new_store().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        store.subscribe("$.watched", move |values| seen2.lock().push(values)).unwrap();
        store.dispatch(Action::Scalar(DispatchAction::Set { path: "$.unwatched".into(), payload: json!(1) })).await;
        assert!(seen.lock().is_empty());
        store.dispatch(Action::Scalar(DispatchAction::Set { path: "$.watched".into(), payload: json!(42) })).await;
        assert_eq!(seen.lock().as_slice(), &[vec![json!(42)]]);
    }
}
