use serde_json::Value as Json;

use crate::error::ExprError;
use crate::json::{PathArray, PathSegment};

use super::ast::{BinOp, Expr, Segment, UnOp};

/// Whether the final segment of a chain may resolve to a slot that does not
/// yet exist in the document (`Slots`), or must already exist (`Values`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Values,
    Slots,
}

pub fn get_by_path<'a>(root: &'a Json, path: &[PathSegment]) -> Option<&'a Json> {
    let mut cur = root;
    for seg in path {
        cur = match (seg, cur) {
            (PathSegment::Key(k), Json::Object(map)) => map.get(k)?,
            (PathSegment::Index(i), Json::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Evaluates `segments` against `root`, returning every `(path, value)` the
/// chain resolves to. `mode` controls whether a final slot that doesn't
/// exist yet is still reported (with `value = None`).
pub fn eval_segments(
    root: &Json,
    segments: &[Segment],
    mode: Mode,
) -> Result<Vec<(PathArray, Option<Json>)>, ExprError> {
    eval_from(&PathArray::new(), root, segments, root, mode)
}

fn eval_from(
    parent_path: &PathArray,
    parent_val: &Json,
    segments: &[Segment],
    root: &Json,
    mode: Mode,
) -> Result<Vec<(PathArray, Option<Json>)>, ExprError> {
    if segments.is_empty() {
        return Ok(vec![(parent_path.clone(), Some(parent_val.clone()))]);
    }
    let seg = &segments[0];
    let rest = &segments[1..];
    let is_last = rest.is_empty();

    let candidates = expand_segment(seg, parent_val, root, is_last, mode)?;
    let mut out = Vec::new();
    for (suffix, value) in candidates {
        let mut child_path = parent_path.clone();
        child_path.extend(suffix);
        match value {
            Some(v) => {
                if rest.is_empty() {
                    out.push((child_path, Some(v)));
                } else {
                    out.extend(eval_from(&child_path, &v, rest, root, mode)?);
                }
            }
            None => {
                if is_last && mode == Mode::Slots {
                    out.push((child_path, None));
                }
            }
        }
    }
    Ok(out)
}

/// Expands one segment against `parent`, returning a suffix path (usually
/// one `PathSegment`, but more for `Recursive`) paired with the value found
/// there, or `None` if the slot doesn't currently exist.
fn expand_segment(
    seg: &Segment,
    parent: &Json,
    root: &Json,
    is_last: bool,
    mode: Mode,
) -> Result<Vec<(PathArray, Option<Json>)>, ExprError> {
    match seg {
        Segment::Wildcard => Ok(children_of(parent)),
        Segment::Key(name) => Ok(key_candidate(parent, name).into_iter().collect()),
        Segment::Index(i) => Ok(index_candidate(parent, *i).into_iter().collect()),
        Segment::MultiKey(names) => Ok(names
            .iter()
            .filter_map(|n| key_candidate(parent, n))
            .collect()),
        Segment::MultiIndex(idxs) => Ok(idxs
            .iter()
            .filter_map(|i| index_candidate(parent, *i))
            .collect()),
        Segment::ExprIndex(exprs) => {
            let ctx = EvalCtx { self_val: parent, root };
            let mut out = Vec::new();
            for expr in exprs {
                let v = eval_expr(expr, &ctx)?;
                match v {
                    Json::String(s) => {
                        if let Some(c) = key_candidate(parent, &s) {
                            out.push(c);
                        }
                    }
                    Json::Number(n) => {
                        let i = n.as_i64().ok_or_else(|| ExprError::NotANumber(n.to_string()))? as isize;
                        if let Some(c) = index_candidate(parent, i) {
                            out.push(c);
                        }
                    }
                    other => return Err(ExprError::NotANumber(other.to_string())),
                }
            }
            Ok(out)
        }
        Segment::Slice { from, to, step } => Ok(slice_candidates(parent, *from, *to, *step)),
        Segment::ExprSlice { from, to, step } => {
            let ctx = EvalCtx { self_val: parent, root };
            let resolve = |e: &Option<Expr>| -> Result<Option<isize>, ExprError> {
                match e {
                    None => Ok(None),
                    Some(expr) => {
                        let v = eval_expr(expr, &ctx)?;
                        let n = v
                            .as_i64()
                            .ok_or_else(|| ExprError::NotANumber(v.to_string()))?;
                        Ok(Some(n as isize))
                    }
                }
            };
            Ok(slice_candidates(parent, resolve(from)?, resolve(to)?, resolve(step)?))
        }
        Segment::Filter(expr) => {
            let mut out = Vec::new();
            for (suffix, value) in children_of(parent) {
                if let Some(v) = &value {
                    let ctx = EvalCtx { self_val: v, root };
                    if truthy(&eval_expr(expr, &ctx)?) {
                        out.push((suffix, value));
                    }
                }
            }
            Ok(out)
        }
        Segment::Recursive(inner) => {
            let effective_mode = if is_last { mode } else { Mode::Values };
            expand_recursive(inner, parent, root, effective_mode)
        }
    }
}

fn children_of(parent: &Json) -> Vec<(PathArray, Option<Json>)> {
    match parent {
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| (vec![PathSegment::Key(k.clone())], Some(v.clone())))
            .collect(),
        Json::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| (vec![PathSegment::Index(i)], Some(v.clone())))
            .collect(),
        _ => Vec::new(),
    }
}

fn key_candidate(parent: &Json, name: &str) -> Option<(PathArray, Option<Json>)> {
    match parent {
        Json::Object(map) => Some((vec![PathSegment::Key(name.to_string())], map.get(name).cloned())),
        _ => None,
    }
}

/// Normalizes a (possibly negative) index against an array's current
/// length. Returns `None` for a parent that isn't an array, or an index that
/// falls outside `[0, len]` (the one-past-the-end slot is kept as a
/// not-yet-existing candidate so `querySlots` can address an append point).
fn index_candidate(parent: &Json, i: isize) -> Option<(PathArray, Option<Json>)> {
    let arr = parent.as_array()?;
    let len = arr.len() as isize;
    let idx = if i < 0 { len + i } else { i };
    if idx < 0 || idx > len {
        return None;
    }
    let idx = idx as usize;
    Some((vec![PathSegment::Index(idx)], arr.get(idx).cloned()))
}

fn slice_candidates(
    parent: &Json,
    from: Option<isize>,
    to: Option<isize>,
    step: Option<isize>,
) -> Vec<(PathArray, Option<Json>)> {
    let Some(arr) = parent.as_array() else {
        return Vec::new();
    };
    let len = arr.len() as isize;
    let step = step.unwrap_or(1);
    if step == 0 || len == 0 {
        return Vec::new();
    }
    let norm = |i: isize| -> isize {
        if i < 0 {
            (len + i).clamp(0, len)
        } else {
            i.clamp(0, len)
        }
    };
    let (start, stop) = if step > 0 {
        (from.map(norm).unwrap_or(0), to.map(norm).unwrap_or(len))
    } else {
        (
            from.map(norm).unwrap_or(len - 1),
            to.map(norm).unwrap_or(-1),
        )
    };
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            if i >= 0 && i < len {
                out.push((vec![PathSegment::Index(i as usize)], Some(arr[i as usize].clone())));
            }
            i += step;
        }
    } else {
        while i > stop {
            if i >= 0 && i < len {
                out.push((vec![PathSegment::Index(i as usize)], Some(arr[i as usize].clone())));
            }
            i += step;
        }
    }
    out
}

fn expand_recursive(
    inner: &[Segment],
    parent: &Json,
    root: &Json,
    mode: Mode,
) -> Result<Vec<(PathArray, Option<Json>)>, ExprError> {
    let mut out = eval_from(&PathArray::new(), parent, inner, root, mode)?;
    match parent {
        Json::Object(map) => {
            for (k, v) in map.iter() {
                for (mut suffix, value) in expand_recursive(inner, v, root, mode)? {
                    let mut full = vec![PathSegment::Key(k.clone())];
                    full.append(&mut suffix);
                    out.push((full, value));
                }
            }
        }
        Json::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                for (mut suffix, value) in expand_recursive(inner, v, root, mode)? {
                    let mut full = vec![PathSegment::Index(i)];
                    full.append(&mut suffix);
                    out.push((full, value));
                }
            }
        }
        _ => {}
    }
    Ok(out)
}

struct EvalCtx<'a> {
    self_val: &'a Json,
    root: &'a Json,
}

fn truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

fn as_f64(v: &Json) -> Result<f64, ExprError> {
    v.as_f64().ok_or_else(|| ExprError::NotANumber(v.to_string()))
}

fn eval_expr(expr: &Expr, ctx: &EvalCtx) -> Result<Json, ExprError> {
    match expr {
        Expr::SelfRef => Ok(ctx.self_val.clone()),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path { absolute, segments } => {
            let base = if *absolute { ctx.root } else { ctx.self_val };
            Ok(get_by_path(base, segments).cloned().unwrap_or(Json::Null))
        }
        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            match op {
                UnOp::Not => Ok(Json::Bool(!truthy(&v))),
                UnOp::Neg => Ok(serde_json::json!(-as_f64(&v)?)),
            }
        }
        Expr::Conditional(cond, then_branch, else_branch) => {
            if truthy(&eval_expr(cond, ctx)?) {
                eval_expr(then_branch, ctx)
            } else {
                eval_expr(else_branch, ctx)
            }
        }
        Expr::Binary(BinOp::And, l, r) => {
            let lv = eval_expr(l, ctx)?;
            if !truthy(&lv) {
                return Ok(Json::Bool(false));
            }
            Ok(Json::Bool(truthy(&eval_expr(r, ctx)?)))
        }
        Expr::Binary(BinOp::Or, l, r) => {
            let lv = eval_expr(l, ctx)?;
            if truthy(&lv) {
                return Ok(Json::Bool(true));
            }
            Ok(Json::Bool(truthy(&eval_expr(r, ctx)?)))
        }
        Expr::Binary(BinOp::Subscript, base, index) => {
            let base_v = eval_expr(base, ctx)?;
            let idx_v = eval_expr(index, ctx)?;
            match (&base_v, &idx_v) {
                (Json::Array(arr), Json::Number(n)) => {
                    let i = n.as_i64().ok_or_else(|| ExprError::NotANumber(n.to_string()))?;
                    let len = arr.len() as i64;
                    let idx = if i < 0 { len + i } else { i };
                    if idx < 0 || idx >= len {
                        return Err(ExprError::MissingElement);
                    }
                    Ok(arr[idx as usize].clone())
                }
                (Json::Object(map), Json::String(k)) => {
                    map.get(k).cloned().ok_or(ExprError::MissingElement)
                }
                (Json::Null, _) | (_, Json::Null) => Err(ExprError::MissingElement),
                _ => Err(ExprError::NotAContainer),
            }
        }
        Expr::Binary(op, l, r) => {
            let lv = eval_expr(l, ctx)?;
            let rv = eval_expr(r, ctx)?;
            eval_binary(*op, &lv, &rv)
        }
    }
}

fn eval_binary(op: BinOp, lv: &Json, rv: &Json) -> Result<Json, ExprError> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div | Mod => {
            let l = as_f64(lv)?;
            let r = as_f64(rv)?;
            let result = match op {
                Add => l + r,
                Sub => l - r,
                Mul => l * r,
                Div => l / r,
                Mod => l % r,
                _ => unreachable!(),
            };
            Ok(serde_json::json!(result))
        }
        Lt | Le | Gt | Ge => {
            let l = as_f64(lv)?;
            let r = as_f64(rv)?;
            let result = match op {
                Lt => l < r,
                Le => l <= r,
                Gt => l > r,
                Ge => l >= r,
                _ => unreachable!(),
            };
            Ok(Json::Bool(result))
        }
        Eq => Ok(Json::Bool(lv == rv)),
        Neq => Ok(Json::Bool(lv != rv)),
        And | Or | Subscript => unreachable!("handled in eval_expr"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parser::compile;
    use serde_json::json;

    #[test]
    fn wildcard_collects_all_children() {
        let root = json!({"a": 1, "b": 2});
        let p = compile("$.*").unwrap();
        let results = eval_segments(&root, &p.segments, Mode::Values).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn filter_keeps_only_matching_elements() {
        let root = json!({"items": [{"price": 5}, {"price": 15}]});
        let p = compile("$.items[?(@.price < 10)]").unwrap();
        let results = eval_segments(&root, &p.segments, Mode::Values).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, Some(json!({"price": 5})));
    }

    #[test]
    fn slots_mode_returns_missing_key() {
        let root = json!({});
        let p = compile("$.foo").unwrap();
        let results = eval_segments(&root, &p.segments, Mode::Slots).unwrap();
        assert_eq!(results, vec![(vec![PathSegment::Key("foo".into())], None)]);
        let results = eval_segments(&root, &p.segments, Mode::Values).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn recursive_descent_finds_nested_keys() {
        let root = json!({"a": {"foo": 1}, "b": {"c": {"foo": 2}}});
        let p = compile("$..foo").unwrap();
        let results = eval_segments(&root, &p.segments, Mode::Values).unwrap();
        assert_eq!(results.len(), 2);
    }
}
