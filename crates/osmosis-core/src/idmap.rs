//! Id-Mapped JSON (§4.2): a `serde_json::Value` document paired with a
//! structural mirror, `path_to_id`, that remembers which op last named each
//! slot, plus the reverse index `id_to_path`. This is what lets an op
//! address "the element I created earlier" by id instead of by a literal
//! path that concurrent edits may have shifted out from under it.

use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::action::{self, ScalarAction};
use crate::error::ActionFailure;
use crate::id::Timestamp;
use crate::json::PathSegment;
use crate::json::PathArray;
use crate::op::{AnchoredAction, OpPath};

/// A node in the structural mirror of the document. `ids` holds every op
/// that has ever named this exact slot, most recent first — the head is
/// the live owner, the rest exist only so concurrent-write tie-breaks have
/// something to compare against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdNode {
    pub ids: Vec<Timestamp>,
    pub children: IdChildren,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdChildren {
    Leaf,
    Object(FxHashMap<String, IdNode>),
    Array(Vec<IdNode>),
}

impl Default for IdChildren {
    fn default() -> Self {
        IdChildren::Leaf
    }
}

impl IdNode {
    fn child(&self, seg: &PathSegment) -> Option<&IdNode> {
        match (seg, &self.children) {
            (PathSegment::Key(k), IdChildren::Object(map)) => map.get(k),
            (PathSegment::Index(i), IdChildren::Array(vec)) => vec.get(*i),
            _ => None,
        }
    }

    fn child_mut(&mut self, seg: &PathSegment) -> Option<&mut IdNode> {
        match (seg, &mut self.children) {
            (PathSegment::Key(k), IdChildren::Object(map)) => map.get_mut(k),
            (PathSegment::Index(i), IdChildren::Array(vec)) => vec.get_mut(*i),
            _ => None,
        }
    }

    fn child_mut_or_create(&mut self, seg: &PathSegment) -> &mut IdNode {
        match seg {
            PathSegment::Key(k) => {
                if !matches!(self.children, IdChildren::Object(_)) {
                    self.children = IdChildren::Object(FxHashMap::default());
                }
                let IdChildren::Object(map) = &mut self.children else { unreachable!() };
                map.entry(k.clone()).or_default()
            }
            PathSegment::Index(i) => {
                if !matches!(self.children, IdChildren::Array(_)) {
                    self.children = IdChildren::Array(Vec::new());
                }
                let IdChildren::Array(vec) = &mut self.children else { unreachable!() };
                while vec.len() <= *i {
                    vec.push(IdNode::default());
                }
                &mut vec[*i]
            }
        }
    }

    /// Every `(suffix, id)` pair in this subtree, `suffix` relative to this
    /// node. Used to unregister a deleted subtree and to re-derive
    /// `id_to_path` after an array splice.
    fn collect(&self, prefix: &PathArray, out: &mut Vec<(PathArray, Timestamp)>) {
        for id in &self.ids {
            out.push((prefix.clone(), *id));
        }
        match &self.children {
            IdChildren::Leaf => {}
            IdChildren::Object(map) => {
                for (k, child) in map {
                    let mut p = prefix.clone();
                    p.push(PathSegment::Key(k.clone()));
                    child.collect(&p, out);
                }
            }
            IdChildren::Array(vec) => {
                for (i, child) in vec.iter().enumerate() {
                    let mut p = prefix.clone();
                    p.push(PathSegment::Index(i));
                    child.collect(&p, out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdMappedJson {
    pub root: Json,
    pub id_to_path: FxHashMap<Timestamp, PathArray>,
    pub path_to_id: IdNode,
}

impl IdMappedJson {
    pub fn new(root: Json) -> Self {
        IdMappedJson {
            root,
            id_to_path: FxHashMap::default(),
            path_to_id: IdNode::default(),
        }
    }

    /// The longest prefix of `path` expressible as `{anchor, suffix}`,
    /// where `anchor` is the most recent op-id recorded at some ancestor
    /// slot of `path` (possibly `path` itself). Falls back to a fully
    /// literal path when no ancestor has ever been named.
    pub fn anchor_path_to_id(&self, path: &PathArray) -> OpPath {
        let mut node = &self.path_to_id;
        let mut best_depth = 0usize;
        let mut best_id = None;
        if let Some(id) = node.ids.first() {
            best_depth = 0;
            best_id = Some(*id);
        }
        for (depth, seg) in path.iter().enumerate() {
            let Some(next) = node.child(seg) else { break };
            node = next;
            if let Some(id) = node.ids.first() {
                best_depth = depth + 1;
                best_id = Some(*id);
            }
        }
        match best_id {
            Some(id) => OpPath {
                anchor: Some(id),
                suffix: path[best_depth..].to_vec(),
            },
            None => OpPath::literal(path.clone()),
        }
    }

    fn resolve(&self, op_path: &OpPath) -> Option<PathArray> {
        let mut base = match op_path.anchor {
            None => PathArray::new(),
            Some(id) => self.id_to_path.get(&id)?.clone(),
        };
        base.extend(op_path.suffix.iter().cloned());
        Some(base)
    }

    fn resolve_scalar(&self, anchored: &AnchoredAction) -> Result<ScalarAction, ActionFailure> {
        let stale = |p: &OpPath| ActionFailure {
            path: p.suffix.clone(),
            message: "anchor no longer names a live slot".into(),
        };
        Ok(match anchored {
            AnchoredAction::Set { path, payload } => ScalarAction::Set {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::Delete { path } => match self.resolve(path) {
                Some(p) => ScalarAction::Delete { path: p },
                // a delete whose target already vanished is a no-op, not a failure
                None => ScalarAction::Delete { path: path.suffix.clone() },
            },
            AnchoredAction::Add { path, payload } => ScalarAction::Add {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::Multiply { path, payload } => ScalarAction::Multiply {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::InitArray { path } => ScalarAction::InitArray {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
            },
            AnchoredAction::InitObject { path } => ScalarAction::InitObject {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
            },
            AnchoredAction::InsertBefore { path, payload } => ScalarAction::InsertBefore {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::InsertAfter { path, payload } => ScalarAction::InsertAfter {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::InsertUnique { path, payload } => ScalarAction::InsertUnique {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                payload: payload.clone(),
            },
            AnchoredAction::Move { path, destination } => ScalarAction::Move {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                destination: self.resolve(destination).ok_or_else(|| stale(destination))?,
            },
            AnchoredAction::Copy { path, destination } => ScalarAction::Copy {
                path: self.resolve(path).ok_or_else(|| stale(path))?,
                destination: self.resolve(destination).ok_or_else(|| stale(destination))?,
            },
        })
    }

    fn node_mut(&mut self, path: &PathArray) -> &mut IdNode {
        let mut node = &mut self.path_to_id;
        for seg in path {
            node = node.child_mut_or_create(seg);
        }
        node
    }

    /// Names `path` with `id`, making it the new live head of that slot. If
    /// the slot was already named, the deposed head is dropped from
    /// `id_to_path` (it stays in the node's `ids` list for tie-breaks) so
    /// only the current head maps to a live path.
    fn register(&mut self, id: Timestamp, path: PathArray) {
        let node = self.node_mut(&path);
        if let Some(prev) = node.ids.first().copied() {
            self.id_to_path.remove(&prev);
        }
        self.node_mut(&path).ids.insert(0, id);
        self.id_to_path.insert(id, path);
    }

    /// Drops the id registered for a slot that was logically vacated but
    /// not structurally removed (array `Move` source, which becomes
    /// `null` in place).
    fn unregister_head(&mut self, path: &PathArray) {
        let node = self.node_mut(path);
        if let Some(id) = node.ids.first().copied() {
            node.ids.remove(0);
            self.id_to_path.remove(&id);
        }
    }

    /// Removes the whole subtree at `path` from both maps (object-key
    /// delete, or the logical removal half of a `Move`/array splice).
    fn unregister_subtree(&mut self, path: &PathArray) {
        let Some((parent, last)) = split_parent(path) else { return };
        let parent_node = self.find_mut(&parent);
        let Some(parent_node) = parent_node else { return };
        let removed = match (&last, &mut parent_node.children) {
            (PathSegment::Key(k), IdChildren::Object(map)) => map.remove(k),
            (PathSegment::Index(i), IdChildren::Array(vec)) if *i < vec.len() => Some(vec.remove(*i)),
            _ => None,
        };
        if let Some(removed) = removed {
            let mut ids = Vec::new();
            removed.collect(&PathArray::new(), &mut ids);
            for (_, id) in ids {
                self.id_to_path.remove(&id);
            }
        }
    }

    fn find_mut(&mut self, path: &PathArray) -> Option<&mut IdNode> {
        let mut node = &mut self.path_to_id;
        for seg in path {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    /// Re-derives `id_to_path` for every id in the subtree rooted at
    /// `array_path` (an array that was just spliced), from the
    /// authoritative structure of `path_to_id` itself.
    fn reindex_array(&mut self, array_path: &PathArray) {
        let node = {
            let mut node = &self.path_to_id;
            let mut ok = true;
            for seg in array_path {
                match node.child(seg) {
                    Some(n) => node = n,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                return;
            }
            node.clone()
        };
        let IdChildren::Array(children) = &node.children else { return };
        for (i, child) in children.iter().enumerate() {
            let mut prefix = array_path.clone();
            prefix.push(PathSegment::Index(i));
            let mut pairs = Vec::new();
            child.collect(&PathArray::new(), &mut pairs);
            for (suffix, id) in pairs {
                let mut full = prefix.clone();
                full.extend(suffix);
                self.id_to_path.insert(id, full);
            }
        }
    }

    fn insert_array_slot(&mut self, array_path: &PathArray, at: usize, id: Timestamp) {
        let node = self.node_mut(array_path);
        if !matches!(node.children, IdChildren::Array(_)) {
            node.children = IdChildren::Array(Vec::new());
        }
        let IdChildren::Array(vec) = &mut node.children else { unreachable!() };
        let at = at.min(vec.len());
        vec.insert(
            at,
            IdNode {
                ids: vec![id],
                children: IdChildren::Leaf,
            },
        );
    }

    fn push_array_slot(&mut self, array_path: &PathArray, id: Timestamp) {
        let node = self.node_mut(array_path);
        if !matches!(node.children, IdChildren::Array(_)) {
            node.children = IdChildren::Array(Vec::new());
        }
        let IdChildren::Array(vec) = &mut node.children else { unreachable!() };
        vec.push(IdNode {
            ids: vec![id],
            children: IdChildren::Leaf,
        });
    }

    /// Resolves `anchored`'s path(s) to their current literal form,
    /// delegates the mutation to the Action Applier, then updates the id
    /// maps to reflect what actually changed.
    pub fn apply(
        &mut self,
        op_id: Timestamp,
        anchored: &AnchoredAction,
    ) -> Result<Vec<PathArray>, ActionFailure> {
        let resolved = self.resolve_scalar(anchored)?;
        let changed = action::apply(&resolved, &mut self.root)?;
        if changed.is_empty() {
            return Ok(changed);
        }
        match &resolved {
            ScalarAction::Set { path, .. } => self.register(op_id, path.clone()),
            ScalarAction::InitArray { path } | ScalarAction::InitObject { path } => {
                self.register(op_id, path.clone())
            }
            ScalarAction::Delete { path } => {
                let array_parent = split_parent(path).and_then(|(parent, seg)| {
                    matches!(seg, PathSegment::Index(_)).then_some(parent)
                });
                self.unregister_subtree(path);
                if let Some(parent) = array_parent {
                    self.reindex_array(&parent);
                }
            }
            ScalarAction::Add { .. } | ScalarAction::Multiply { .. } => {}
            ScalarAction::InsertBefore { path, .. } | ScalarAction::InsertAfter { path, .. } => {
                if let Some((parent, PathSegment::Index(i))) = split_parent(path) {
                    let offset = if matches!(resolved, ScalarAction::InsertAfter { .. }) { 1 } else { 0 };
                    self.insert_array_slot(&parent, i + offset, op_id);
                    self.reindex_array(&parent);
                }
            }
            ScalarAction::InsertUnique { path, .. } => {
                // changed is non-empty only when a new element was appended
                self.push_array_slot(path, op_id);
            }
            ScalarAction::Move { path: source, destination } => {
                if let Some((parent, PathSegment::Index(_))) = split_parent(source) {
                    self.unregister_head(source);
                    self.reindex_array(&parent);
                } else {
                    self.unregister_subtree(source);
                }
                self.register(op_id, destination.clone());
            }
            ScalarAction::Copy { destination, .. } => self.register(op_id, destination.clone()),
        }
        Ok(changed)
    }
}

fn split_parent(path: &PathArray) -> Option<(PathArray, PathSegment)> {
    let (last, parent) = path.split_last()?;
    Some((parent.to_vec(), last.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Uuid;
    use crate::json::path_of;
    use serde_json::json;

    fn ts(i: u32) -> Timestamp {
        Timestamp::new(Uuid::new(), i)
    }

    #[test]
    fn set_registers_id_and_anchors_a_later_rewrite() {
        let mut state = IdMappedJson::new(json!({}));
        let t1 = ts(1);
        state
            .apply(
                t1,
                &AnchoredAction::Set {
                    path: OpPath::literal(path_of(["foo"])),
                    payload: json!(1),
                },
            )
            .unwrap();
        assert_eq!(state.id_to_path[&t1], path_of(["foo"]));

        let anchored = state.anchor_path_to_id(&path_of(["foo"]));
        assert_eq!(anchored.anchor, Some(t1));
        assert!(anchored.suffix.is_empty());

        let t2 = ts(2);
        state
            .apply(
                t2,
                &AnchoredAction::Set {
                    path: anchored,
                    payload: json!(2),
                },
            )
            .unwrap();
        assert_eq!(state.root, json!({"foo": 2}));
        assert_eq!(state.id_to_path[&t2], path_of(["foo"]));
        assert!(!state.id_to_path.contains_key(&t1));
    }

    #[test]
    fn insert_before_shifts_anchors_of_later_siblings() {
        let mut state = IdMappedJson::new(json!({"arr": [1, 2]}));
        let t_a = ts(1);
        state
            .apply(
                t_a,
                &AnchoredAction::Set {
                    path: OpPath::literal(path_of(["arr"])),
                    payload: json!([1, 2]),
                },
            )
            .unwrap();
        let t_0 = ts(2);
        state.register(t_0, vec![PathSegment::Key("arr".into()), PathSegment::Index(0)]);
        let t_1 = ts(3);
        state.register(t_1, vec![PathSegment::Key("arr".into()), PathSegment::Index(1)]);

        let t_new = ts(4);
        state
            .apply(
                t_new,
                &AnchoredAction::InsertBefore {
                    path: OpPath::literal(vec![
                        PathSegment::Key("arr".into()),
                        PathSegment::Index(1),
                    ]),
                    payload: json!(99),
                },
            )
            .unwrap();
        assert_eq!(state.root, json!({"arr": [1, 99, 2]}));
        assert_eq!(
            state.id_to_path[&t_1],
            vec![PathSegment::Key("arr".into()), PathSegment::Index(2)]
        );
        assert_eq!(
            state.id_to_path[&t_new],
            vec![PathSegment::Key("arr".into()), PathSegment::Index(1)]
        );
    }

    #[test]
    fn stale_anchor_fails_instead_of_silently_targeting_root() {
        let mut state = IdMappedJson::new(json!({}));
        let ghost = ts(1);
        let err = state
            .apply(
                ts(2),
                &AnchoredAction::Set {
                    path: OpPath { anchor: Some(ghost), suffix: path_of(["x"]) },
                    payload: json!(1),
                },
            )
            .unwrap_err();
        assert!(err.message.contains("anchor"));
    }
}
