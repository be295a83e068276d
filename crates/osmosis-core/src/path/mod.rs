//! The path language: a JSONPath dialect compiled into a segment AST and
//! evaluated against `serde_json::Value` documents.

mod ast;
mod eval;
mod parser;

pub use ast::{display_path, BinOp, CompiledPath, Expr, Segment, UnOp};
pub use eval::Mode;

use serde_json::Value as Json;

use crate::error::ExprError;
use crate::json::{PathArray, PathSegment};

pub fn compile(source: &str) -> Result<CompiledPath, ExprError> {
    parser::compile(source)
}

/// Non-materialized-path flat results: every value the path resolves to.
pub fn query_values(json: &Json, compiled: &CompiledPath) -> Result<Vec<Json>, ExprError> {
    Ok(eval::eval_segments(json, &compiled.segments, Mode::Values)?
        .into_iter()
        .filter_map(|(_, v)| v)
        .collect())
}

/// Paths whose final slot currently exists.
pub fn query_paths(json: &Json, compiled: &CompiledPath) -> Result<Vec<PathArray>, ExprError> {
    Ok(eval::eval_segments(json, &compiled.segments, Mode::Values)?
        .into_iter()
        .map(|(p, _)| p)
        .collect())
}

/// Paths whose final slot may or may not exist yet (needed for `Set` on a
/// new key, or `InsertBefore`/`InsertAfter` at the end of an array).
pub fn query_slots(json: &Json, compiled: &CompiledPath) -> Result<Vec<PathArray>, ExprError> {
    Ok(eval::eval_segments(json, &compiled.segments, Mode::Slots)?
        .into_iter()
        .map(|(p, _)| p)
        .collect())
}

/// Fans a multi-key / slice / filter / wildcard path out into individually
/// addressable, purely literal compiled paths, evaluated against the
/// current document. Each resulting `CompiledPath` names exactly one slot
/// (existing or not), so the Store can anchor and timestamp it
/// independently.
pub fn split_into_singular_paths(
    json: &Json,
    compiled: &CompiledPath,
) -> Result<Vec<CompiledPath>, ExprError> {
    let slots = query_slots(json, compiled)?;
    Ok(slots
        .into_iter()
        .map(|path| CompiledPath {
            source: display_path(&path),
            segments: path
                .into_iter()
                .map(|seg| match seg {
                    PathSegment::Key(k) => Segment::Key(k),
                    PathSegment::Index(i) => Segment::Index(i as isize),
                })
                .collect(),
        })
        .collect())
}

/// True when `compiled`, evaluated against `json`, could resolve to a path
/// that has `prefix` as a prefix. Used by subscriptions to decide whether a
/// changed path is relevant without re-running the full query.
pub fn path_intersects_prefix(
    json: &Json,
    compiled: &CompiledPath,
    prefix: &PathArray,
) -> bool {
    match query_paths(json, compiled) {
        Ok(paths) => paths.iter().any(|p| {
            p.len() >= prefix.len() && p[..prefix.len()] == prefix[..]
                || prefix.len() >= p.len() && prefix[..p.len()] == p[..]
        }),
        Err(_) => false,
    }
}

pub(crate) fn get_by_path<'a>(root: &'a Json, path: &[PathSegment]) -> Option<&'a Json> {
    eval::get_by_path(root, path)
}
