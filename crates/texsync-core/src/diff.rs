//! Diff codec: converts between text snapshots and edit scripts.
//!
//! A patch is an ordered list of [`DiffOp`]s that fully describes its base text.
//! Every op carries the base position it expects to run at, and `equal`/`delete`
//! ops carry the base text they expect to find. When the base has drifted since
//! the patch was computed, [`apply`] fails with a [`PatchConflict`] instead of
//! guessing.
//!
//! Positions are character offsets (Unicode scalar values), not bytes.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, TextDiff};
use thiserror::Error;

/// Kind of a single diff operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Text that is inserted at `position`
    Insert,
    /// Base text that is removed
    Delete,
    /// Base text that is kept unchanged
    Equal,
}

/// One step of an edit script.
///
/// Wire format: `{"op":"insert","position":0,"text":"hello"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOp {
    pub op: OpKind,
    /// Base cursor (in chars) at which this op applies
    pub position: usize,
    pub text: String,
}

impl DiffOp {
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self {
            op: OpKind::Insert,
            position,
            text: text.into(),
        }
    }

    pub fn delete(position: usize, text: impl Into<String>) -> Self {
        Self {
            op: OpKind::Delete,
            position,
            text: text.into(),
        }
    }

    pub fn equal(position: usize, text: impl Into<String>) -> Self {
        Self {
            op: OpKind::Equal,
            position,
            text: text.into(),
        }
    }

    /// Number of base characters this op consumes.
    fn base_len(&self) -> usize {
        match self.op {
            OpKind::Insert => 0,
            OpKind::Delete | OpKind::Equal => self.text.chars().count(),
        }
    }
}

/// Why a patch could not be applied to the current base.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchConflict {
    #[error("op {op_index} expects position {expected}, but the base cursor is at {actual}")]
    PositionMismatch {
        op_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("op {op_index} expects {expected:?} at position {position}, found {found:?}")]
    ContextMismatch {
        op_index: usize,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("op {op_index} runs past the end of the base ({base_len} chars)")]
    BaseTooShort { op_index: usize, base_len: usize },

    #[error("patch ends at position {consumed}, but the base has {base_len} chars")]
    UnconsumedBase { consumed: usize, base_len: usize },
}

/// Compute an edit script turning `old_text` into `new_text`.
///
/// Uses Myers' algorithm over characters. The result always covers the whole
/// of `old_text`, so `apply(old_text, &compute(old_text, new_text))` yields
/// `new_text`.
pub fn compute(old_text: &str, new_text: &str) -> Vec<DiffOp> {
    let old_chars: Vec<char> = old_text.chars().collect();
    let new_chars: Vec<char> = new_text.chars().collect();

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_chars(old_text, new_text);

    let mut ops = Vec::new();
    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let old_slice = || old_chars[old_range.clone()].iter().collect::<String>();
        let new_slice = || new_chars[new_range.clone()].iter().collect::<String>();

        match tag {
            DiffTag::Equal => push_op(&mut ops, DiffOp::equal(old_range.start, old_slice())),
            DiffTag::Delete => push_op(&mut ops, DiffOp::delete(old_range.start, old_slice())),
            DiffTag::Insert => push_op(&mut ops, DiffOp::insert(old_range.start, new_slice())),
            DiffTag::Replace => {
                push_op(&mut ops, DiffOp::delete(old_range.start, old_slice()));
                push_op(&mut ops, DiffOp::insert(old_range.end, new_slice()));
            }
        }
    }
    ops
}

/// Append an op, merging it into the previous one when both are the same kind.
fn push_op(ops: &mut Vec<DiffOp>, op: DiffOp) {
    if op.text.is_empty() {
        return;
    }
    if let Some(last) = ops.last_mut() {
        let contiguous = match op.op {
            OpKind::Insert => last.op == OpKind::Insert && last.position == op.position,
            _ => last.op == op.op && last.position + last.base_len() == op.position,
        };
        if contiguous {
            last.text.push_str(&op.text);
            return;
        }
    }
    ops.push(op);
}

/// Apply an edit script to `base_text`.
///
/// All-or-nothing: on conflict nothing is returned and the caller's snapshot is
/// left as it was.
pub fn apply(base_text: &str, ops: &[DiffOp]) -> Result<String, PatchConflict> {
    let base: Vec<char> = base_text.chars().collect();
    let mut out = String::with_capacity(base_text.len());
    let mut cursor = 0usize;

    for (op_index, op) in ops.iter().enumerate() {
        if op.position != cursor {
            return Err(PatchConflict::PositionMismatch {
                op_index,
                expected: op.position,
                actual: cursor,
            });
        }

        match op.op {
            OpKind::Insert => out.push_str(&op.text),
            OpKind::Equal | OpKind::Delete => {
                let len = op.base_len();
                let end = cursor + len;
                if end > base.len() {
                    return Err(PatchConflict::BaseTooShort {
                        op_index,
                        base_len: base.len(),
                    });
                }

                let found = &base[cursor..end];
                if !found.iter().copied().eq(op.text.chars()) {
                    return Err(PatchConflict::ContextMismatch {
                        op_index,
                        position: cursor,
                        expected: op.text.clone(),
                        found: found.iter().collect(),
                    });
                }

                if op.op == OpKind::Equal {
                    out.push_str(&op.text);
                }
                cursor = end;
            }
        }
    }

    if cursor != base.len() {
        return Err(PatchConflict::UnconsumedBase {
            consumed: cursor,
            base_len: base.len(),
        });
    }

    Ok(out)
}

/// True if the script leaves its base unchanged.
pub fn is_identity(ops: &[DiffOp]) -> bool {
    ops.iter().all(|op| op.op == OpKind::Equal)
}

/// Total characters inserted by the script.
pub fn inserted_len(ops: &[DiffOp]) -> usize {
    ops.iter()
        .filter(|op| op.op == OpKind::Insert)
        .map(|op| op.text.chars().count())
        .sum()
}

/// Total characters deleted by the script.
pub fn deleted_len(ops: &[DiffOp]) -> usize {
    ops.iter()
        .filter(|op| op.op == OpKind::Delete)
        .map(|op| op.text.chars().count())
        .sum()
}
