//! The Action Applier: applies one scalar mutation to a `serde_json::Value`
//! document, returning the set of changed paths or a typed failure.

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::ActionFailure;
use crate::json::{PathArray, PathSegment};

/// One mutation applied to the document. `path` is always a direct,
/// literal path at the moment of application (anchoring into an
/// id-addressable path happens one layer up, in the Id-Mapped JSON module).
///
/// `Move`/`Copy` carry their destination as a typed `PathArray` field rather
/// than packing it into a generic payload — the wire format doesn't need to
/// match byte-for-byte across implementations (§6), so this is the more
/// idiomatic Rust shape for the same semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ScalarAction {
    Set { path: PathArray, payload: Json },
    Delete { path: PathArray },
    Add { path: PathArray, payload: Json },
    Multiply { path: PathArray, payload: Json },
    InitArray { path: PathArray },
    InitObject { path: PathArray },
    InsertBefore { path: PathArray, payload: Json },
    InsertAfter { path: PathArray, payload: Json },
    InsertUnique { path: PathArray, payload: Json },
    Move { path: PathArray, destination: PathArray },
    Copy { path: PathArray, destination: PathArray },
}

impl ScalarAction {
    /// The path this action is primarily anchored on (its `path` field;
    /// `Move`/`Copy` source). Used by the Id-Mapped JSON layer to decide
    /// what to anchor.
    pub fn primary_path(&self) -> &PathArray {
        match self {
            ScalarAction::Set { path, .. }
            | ScalarAction::Delete { path }
            | ScalarAction::Add { path, .. }
            | ScalarAction::Multiply { path, .. }
            | ScalarAction::InitArray { path }
            | ScalarAction::InitObject { path }
            | ScalarAction::InsertBefore { path, .. }
            | ScalarAction::InsertAfter { path, .. }
            | ScalarAction::InsertUnique { path, .. }
            | ScalarAction::Move { path, .. }
            | ScalarAction::Copy { path, .. } => path,
        }
    }
}

/// The dispatch-surface counterpart of `ScalarAction` (§6 "Action
/// surface"): same taxonomy, but `path`/`destination` are Path Language
/// source strings rather than already-resolved `PathArray`s, since a
/// caller addresses the store by query, not by position. The Store
/// compiles and evaluates these against the live document, fanning a
/// multi-match `path` out into one op per matched slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum DispatchAction {
    Set { path: String, payload: Json },
    Delete { path: String },
    Add { path: String, payload: Json },
    Multiply { path: String, payload: Json },
    InitArray { path: String },
    InitObject { path: String },
    InsertBefore { path: String, payload: Json },
    InsertAfter { path: String, payload: Json },
    InsertUnique { path: String, payload: Json },
    Move { path: String, destination: String },
    Copy { path: String, destination: String },
}

impl DispatchAction {
    pub fn path(&self) -> &str {
        match self {
            DispatchAction::Set { path, .. }
            | DispatchAction::Delete { path }
            | DispatchAction::Add { path, .. }
            | DispatchAction::Multiply { path, .. }
            | DispatchAction::InitArray { path }
            | DispatchAction::InitObject { path }
            | DispatchAction::InsertBefore { path, .. }
            | DispatchAction::InsertAfter { path, .. }
            | DispatchAction::InsertUnique { path, .. }
            | DispatchAction::Move { path, .. }
            | DispatchAction::Copy { path, .. } => path,
        }
    }

    pub fn destination(&self) -> Option<&str> {
        match self {
            DispatchAction::Move { destination, .. } | DispatchAction::Copy { destination, .. } => {
                Some(destination)
            }
            _ => None,
        }
    }
}

/// The full input to `Store::dispatch` (§6): a single scalar action, an
/// atomic batch of them, or a network side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Action {
    Scalar(DispatchAction),
    Transaction(Vec<DispatchAction>),
    Network(crate::op::NetworkAction),
}

fn navigate_mut<'a>(root: &'a mut Json, path: &[PathSegment]) -> Option<&'a mut Json> {
    let mut cur = root;
    for seg in path {
        cur = match (seg, cur) {
            (PathSegment::Key(k), Json::Object(map)) => map.get_mut(k)?,
            (PathSegment::Index(i), Json::Array(arr)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn navigate<'a>(root: &'a Json, path: &[PathSegment]) -> Option<&'a Json> {
    crate::path::get_by_path(root, path)
}

fn fail(path: &[PathSegment], message: impl Into<String>) -> ActionFailure {
    ActionFailure {
        path: path.to_vec(),
        message: message.into(),
    }
}

/// Writes `value` at `path` (parent must already be a container), returning
/// the changed path list. Shared by `Set`, the destination half of
/// `Move`/`Copy`, and array-append in `InitArray`/`InitObject`.
fn write_at(root: &mut Json, path: &[PathSegment], value: Json) -> Result<PathArray, ActionFailure> {
    let (last, parent_path) = path
        .split_last()
        .ok_or_else(|| fail(path, "cannot write to the document root"))?;
    let parent = navigate_mut(root, parent_path).ok_or_else(|| fail(path, "parent not found"))?;
    match (last, parent) {
        (PathSegment::Key(k), Json::Object(map)) => {
            map.insert(k.clone(), value);
        }
        (PathSegment::Index(i), Json::Array(arr)) => {
            if *i > arr.len() {
                return Err(fail(path, "index out of bounds"));
            }
            if *i == arr.len() {
                arr.push(value);
            } else {
                arr[*i] = value;
            }
        }
        _ => return Err(fail(path, "parent not container")),
    }
    Ok(path.to_vec())
}

pub fn apply(action: &ScalarAction, root: &mut Json) -> Result<Vec<PathArray>, ActionFailure> {
    match action {
        ScalarAction::Set { path, payload } => {
            if path.is_empty() {
                return Err(fail(path, "cannot set the document root"));
            }
            Ok(vec![write_at(root, path, payload.clone())?])
        }
        ScalarAction::Delete { path } => apply_delete(path, root),
        ScalarAction::Add { path, payload } => apply_math(path, payload, root, |a, b| a + b),
        ScalarAction::Multiply { path, payload } => apply_math(path, payload, root, |a, b| a * b),
        ScalarAction::InitArray { path } => apply_init(path, root, Json::Array(Vec::new()), Json::is_array),
        ScalarAction::InitObject { path } => {
            apply_init(path, root, Json::Object(Default::default()), Json::is_object)
        }
        ScalarAction::InsertBefore { path, payload } => apply_insert(path, payload, root, 0),
        ScalarAction::InsertAfter { path, payload } => apply_insert(path, payload, root, 1),
        ScalarAction::InsertUnique { path, payload } => apply_insert_unique(path, payload, root),
        ScalarAction::Move { path, destination } => apply_move_or_copy(path, destination, root, true),
        ScalarAction::Copy { path, destination } => apply_move_or_copy(path, destination, root, false),
    }
}

fn apply_delete(path: &[PathSegment], root: &mut Json) -> Result<Vec<PathArray>, ActionFailure> {
    if path.is_empty() {
        return Err(fail(path, "cannot delete the document root"));
    }
    let (last, parent_path) = path.split_last().unwrap();
    let Some(parent) = navigate_mut(root, parent_path) else {
        return Ok(Vec::new()); // path missing is a no-op, not a failure
    };
    match (last, parent) {
        (PathSegment::Key(k), Json::Object(map)) => {
            if map.remove(k).is_some() {
                Ok(vec![path.to_vec()])
            } else {
                Ok(Vec::new())
            }
        }
        (PathSegment::Index(i), Json::Array(arr)) => {
            if *i >= arr.len() {
                return Ok(Vec::new());
            }
            let old_len = arr.len();
            arr.remove(*i);
            Ok((*i..old_len)
                .map(|j| {
                    let mut p = parent_path.to_vec();
                    p.push(PathSegment::Index(j));
                    p
                })
                .collect())
        }
        _ => Ok(Vec::new()),
    }
}

fn apply_math(
    path: &[PathSegment],
    payload: &Json,
    root: &mut Json,
    op: impl Fn(f64, f64) -> f64,
) -> Result<Vec<PathArray>, ActionFailure> {
    if path.is_empty() {
        return Err(fail(path, "cannot apply a math op to the document root"));
    }
    let (last, parent_path) = path.split_last().unwrap();
    let parent = navigate_mut(root, parent_path).ok_or_else(|| fail(path, "parent not found"))?;
    let payload_n = payload
        .as_f64()
        .ok_or_else(|| fail(path, "payload is not a number"))?;
    match (last, parent) {
        (PathSegment::Key(k), Json::Object(map)) => {
            let cur = map
                .get(k)
                .and_then(Json::as_f64)
                .ok_or_else(|| fail(path, "current value is not a number"))?;
            map.insert(k.clone(), serde_json::json!(op(cur, payload_n)));
        }
        (PathSegment::Index(i), Json::Array(arr)) => {
            let cur = arr
                .get(*i)
                .and_then(Json::as_f64)
                .ok_or_else(|| fail(path, "current value is not a number"))?;
            arr[*i] = serde_json::json!(op(cur, payload_n));
        }
        _ => return Err(fail(path, "parent not container")),
    }
    Ok(vec![path.to_vec()])
}

fn apply_init(
    path: &[PathSegment],
    root: &mut Json,
    empty: Json,
    already: impl Fn(&Json) -> bool,
) -> Result<Vec<PathArray>, ActionFailure> {
    if path.is_empty() {
        return Err(fail(path, "cannot init the document root"));
    }
    if let Some(existing) = navigate(root, path) {
        if already(existing) {
            return Ok(Vec::new());
        }
    }
    Ok(vec![write_at(root, path, empty)?])
}

fn apply_insert(
    path: &[PathSegment],
    payload: &Json,
    root: &mut Json,
    offset: usize,
) -> Result<Vec<PathArray>, ActionFailure> {
    if path.is_empty() {
        return Err(fail(path, "insert needs an anchor element"));
    }
    let (last, parent_path) = path.split_last().unwrap();
    let anchor = last
        .as_index()
        .ok_or_else(|| fail(path, "insert anchor must be an array index"))?;
    let parent = navigate_mut(root, parent_path).ok_or_else(|| fail(path, "parent not found"))?;
    let Json::Array(arr) = parent else {
        return Err(fail(path, "parent is not an array"));
    };
    let insert_at = anchor + offset;
    if insert_at > arr.len() {
        return Err(fail(path, "insert index out of bounds"));
    }
    arr.insert(insert_at, payload.clone());
    let new_len = arr.len();
    Ok((insert_at..new_len)
        .map(|j| {
            let mut p = parent_path.to_vec();
            p.push(PathSegment::Index(j));
            p
        })
        .collect())
}

fn apply_insert_unique(
    path: &[PathSegment],
    payload: &Json,
    root: &mut Json,
) -> Result<Vec<PathArray>, ActionFailure> {
    let target = navigate_mut(root, path).ok_or_else(|| fail(path, "path not found"))?;
    let Json::Array(arr) = target else {
        return Err(fail(path, "path is not an array"));
    };
    if arr.iter().any(|v| v == payload) {
        return Ok(Vec::new());
    }
    arr.push(payload.clone());
    let mut p = path.to_vec();
    p.push(PathSegment::Index(arr.len() - 1));
    Ok(vec![p])
}

fn apply_move_or_copy(
    source: &[PathSegment],
    destination: &[PathSegment],
    root: &mut Json,
    is_move: bool,
) -> Result<Vec<PathArray>, ActionFailure> {
    if source.is_empty() {
        return Err(fail(source, "cannot move the document root"));
    }
    let value = navigate(root, source)
        .cloned()
        .ok_or_else(|| fail(source, "source missing"))?;
    let mut changed = vec![write_at(root, destination, value)?];
    if is_move {
        let (last, parent_path) = source.split_last().unwrap();
        if let Some(parent) = navigate_mut(root, parent_path) {
            match (last, parent) {
                (PathSegment::Key(k), Json::Object(map)) => {
                    map.remove(k);
                }
                (PathSegment::Index(i), Json::Array(arr)) => {
                    if *i < arr.len() {
                        arr[*i] = Json::Null;
                    }
                }
                _ => {}
            }
        }
        changed.push(source.to_vec());
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::path_of;
    use serde_json::json;

    #[test]
    fn set_writes_new_key() {
        let mut root = json!({});
        let changed = apply(
            &ScalarAction::Set {
                path: path_of(["foo"]),
                payload: json!("bar"),
            },
            &mut root,
        )
        .unwrap();
        assert_eq!(root, json!({"foo": "bar"}));
        assert_eq!(changed, vec![path_of(["foo"])]);
    }

    #[test]
    fn delete_on_array_shifts_changed_through_old_len() {
        let mut root = json!({"foo": [1, 2, 3, 4]});
        let foo_1 = vec![PathSegment::Key("foo".into()), PathSegment::Index(1)];
        let changed = apply(&ScalarAction::Delete { path: foo_1 }, &mut root).unwrap();
        assert_eq!(root, json!({"foo": [1, 3, 4]}));
        let expect = |i: usize| vec![PathSegment::Key("foo".into()), PathSegment::Index(i)];
        assert_eq!(changed, vec![expect(1), expect(2), expect(3)]);
    }

    #[test]
    fn set_on_root_fails() {
        let mut root = json!({});
        let err = apply(
            &ScalarAction::Set {
                path: vec![],
                payload: json!(1),
            },
            &mut root,
        )
        .unwrap_err();
        assert!(err.message.contains("root"));
    }

    #[test]
    fn delete_missing_path_is_a_no_op() {
        let mut root = json!({});
        let changed = apply(&ScalarAction::Delete { path: path_of(["missing"]) }, &mut root).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn add_requires_a_number() {
        let mut root = json!({"foo": "not a number"});
        let err = apply(
            &ScalarAction::Add {
                path: path_of(["foo"]),
                payload: json!(1),
            },
            &mut root,
        )
        .unwrap_err();
        assert!(err.message.contains("number"));
    }

    #[test]
    fn init_array_is_idempotent() {
        let mut root = json!({"foo": [1]});
        let changed = apply(&ScalarAction::InitArray { path: path_of(["foo"]) }, &mut root).unwrap();
        assert!(changed.is_empty());
        assert_eq!(root, json!({"foo": [1]}));
    }
}
