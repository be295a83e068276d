//! The `Op` type stored in the Operation Log, and its anchored-path flavor
//! of the Action Applier's action taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::id::{Timestamp, Uuid};
use crate::json::PathArray;

/// A path that may be anchored to a prior op's id, or fully literal.
/// `anchor = None` means `suffix` is the complete direct path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpPath {
    pub anchor: Option<Timestamp>,
    pub suffix: PathArray,
}

impl OpPath {
    pub fn literal(path: PathArray) -> Self {
        OpPath { anchor: None, suffix: path }
    }
}

/// The anchored-path counterpart of `ScalarAction`: same taxonomy, but
/// paths may reference a slot by a prior op's id instead of a literal
/// position, so they keep pointing at "the same logical element" as
/// concurrent edits shift positions around them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AnchoredAction {
    Set { path: OpPath, payload: Json },
    Delete { path: OpPath },
    Add { path: OpPath, payload: Json },
    Multiply { path: OpPath, payload: Json },
    InitArray { path: OpPath },
    InitObject { path: OpPath },
    InsertBefore { path: OpPath, payload: Json },
    InsertAfter { path: OpPath, payload: Json },
    InsertUnique { path: OpPath, payload: Json },
    Move { path: OpPath, destination: OpPath },
    Copy { path: OpPath, destination: OpPath },
}

/// The network/pairing actions from the action surface (§6). None of them
/// touch the document, so they never produce anchored paths or ops that
/// replay through the Action Applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkAction {
    RequestPair { peer: Uuid },
    AcceptPair { peer: Uuid },
    RejectPair { peer: Uuid },
    /// Not implemented upstream either: a no-op that emits an event. See
    /// DESIGN.md.
    Unpair { peer: Uuid },
    SetVisibleToPeers(bool),
    SetSyncEnabled(bool),
}

/// What one op actually does: a single anchored scalar action, an atomic
/// batch of them (`Transaction`), or a network side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OpKind {
    Scalar(AnchoredAction),
    Transaction(Vec<AnchoredAction>),
    Network(NetworkAction),
}

/// One entry in the Operation Log. Never mutated after creation; ops are
/// only appended (locally or via merge) or trimmed by history compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub timestamp: Timestamp,
    pub kind: OpKind,
}

impl Op {
    pub fn new(timestamp: Timestamp, kind: OpKind) -> Self {
        Op { timestamp, kind }
    }
}
