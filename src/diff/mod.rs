//! Structural diff over JSON trees.
//!
//! Produces an ordered sequence of operations describing how one tree must
//! change to become another. Traversal is depth-first pre-order: at every
//! shared container the key-level additions and removals are emitted first
//! (grouped, one operation per container), then common keys are descended
//! into. Scalar mismatches emit a `Change` op. The ordering is deterministic
//! for a given pair of inputs.

pub mod pipeline;

use serde_json::Value;

/// One step of a diff path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The segment as a display string (array indices are stringified).
    pub fn as_str(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }

    /// Borrow the object key, or `None` for an array index.
    pub fn key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Index(_) => None,
        }
    }
}

/// Path from the document root to the container an operation applies to.
pub type Path = Vec<Segment>;

/// A single structural difference.
///
/// `Add` and `Remove` carry the container path plus the entries that were
/// added to / removed from that container. `Change` carries the path of the
/// leaf whose value differs.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    Add {
        path: Path,
        entries: Vec<(Segment, Value)>,
    },
    Remove {
        path: Path,
        entries: Vec<(Segment, Value)>,
    },
    Change {
        path: Path,
        from: Value,
        to: Value,
    },
}

impl DiffOp {
    pub fn path(&self) -> &Path {
        match self {
            DiffOp::Add { path, .. } | DiffOp::Remove { path, .. } | DiffOp::Change { path, .. } => {
                path
            }
        }
    }
}

/// Compute the ordered structural diff between `baseline` and `candidate`.
pub fn diff(baseline: &Value, candidate: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_at(&mut Vec::new(), baseline, candidate, &mut ops);
    ops
}

fn diff_at(path: &mut Path, a: &Value, b: &Value, ops: &mut Vec<DiffOp>) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let added: Vec<(Segment, Value)> = mb
                .iter()
                .filter(|(k, _)| !ma.contains_key(k.as_str()))
                .map(|(k, v)| (Segment::Key(k.clone()), v.clone()))
                .collect();
            if !added.is_empty() {
                ops.push(DiffOp::Add {
                    path: path.clone(),
                    entries: added,
                });
            }

            let removed: Vec<(Segment, Value)> = ma
                .iter()
                .filter(|(k, _)| !mb.contains_key(k.as_str()))
                .map(|(k, v)| (Segment::Key(k.clone()), v.clone()))
                .collect();
            if !removed.is_empty() {
                ops.push(DiffOp::Remove {
                    path: path.clone(),
                    entries: removed,
                });
            }

            for (k, va) in ma.iter() {
                if let Some(vb) = mb.get(k) {
                    path.push(Segment::Key(k.clone()));
                    diff_at(path, va, vb, ops);
                    path.pop();
                }
            }
        }
        (Value::Array(xa), Value::Array(xb)) => {
            let common = xa.len().min(xb.len());

            if xb.len() > xa.len() {
                let entries = (common..xb.len())
                    .map(|i| (Segment::Index(i), xb[i].clone()))
                    .collect();
                ops.push(DiffOp::Add {
                    path: path.clone(),
                    entries,
                });
            }
            if xa.len() > xb.len() {
                let entries = (common..xa.len())
                    .map(|i| (Segment::Index(i), xa[i].clone()))
                    .collect();
                ops.push(DiffOp::Remove {
                    path: path.clone(),
                    entries,
                });
            }

            for i in 0..common {
                path.push(Segment::Index(i));
                diff_at(path, &xa[i], &xb[i], ops);
                path.pop();
            }
        }
        _ => {
            if a != b {
                ops.push(DiffOp::Change {
                    path: path.clone(),
                    from: a.clone(),
                    to: b.clone(),
                });
            }
        }
    }
}
