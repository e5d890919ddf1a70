//! Pairwise operation transforms.
//!
//! `transform(incoming, applied)` rebases two operations that were both
//! generated against the same base revision. The coordinator always passes
//! the client's submitted operation as `incoming` and the already-committed
//! log entry as `applied`; that fixed argument order is what makes the
//! equal-position insert tie-break deterministic without comparing client
//! identities.

use crate::operation::Operation;

/// Transform a concurrent operation pair, returning `(incoming', applied')`
/// such that applying `applied` then `incoming'` yields the same document
/// as applying `incoming` then `applied'`.
///
/// Tie and overlap policy:
/// - inserts at the same position: the already-committed `applied` insert
///   keeps its place, the `incoming` insert lands to its right;
/// - an insert strictly inside a concurrently deleted span clamps to the
///   span's start and survives; the delete is unchanged;
/// - overlapping deletes are clipped against each other so the shared span
///   is removed exactly once.
pub fn transform(incoming: &Operation, applied: &Operation) -> (Operation, Operation) {
    use Operation::{Delete, Insert};

    match (incoming, applied) {
        (
            Insert {
                position: pi,
                value: vi,
            },
            Insert {
                position: pa,
                value: va,
            },
        ) => {
            if pi < pa {
                let shifted = Insert {
                    position: pa + vi.chars().count(),
                    value: va.clone(),
                };
                (incoming.clone(), shifted)
            } else {
                // Equal positions shift the incoming side right.
                let shifted = Insert {
                    position: pi + va.chars().count(),
                    value: vi.clone(),
                };
                (shifted, applied.clone())
            }
        }

        (
            Insert {
                position: p,
                value: v,
            },
            Delete {
                position: d,
                length: l,
            },
        ) => {
            let (ins, del) = transform_insert_delete(*p, v, *d, *l);
            (ins, del)
        }

        (
            Delete {
                position: d,
                length: l,
            },
            Insert {
                position: p,
                value: v,
            },
        ) => {
            let (ins, del) = transform_insert_delete(*p, v, *d, *l);
            (del, ins)
        }

        (
            Delete {
                position: pi,
                length: li,
            },
            Delete {
                position: pa,
                length: la,
            },
        ) => (
            clip_delete(*pi, *li, *pa, *la),
            clip_delete(*pa, *la, *pi, *li),
        ),
    }
}

/// Insert-vs-delete rebase, orientation-independent. Returns the adjusted
/// `(insert, delete)` pair.
fn transform_insert_delete(p: usize, v: &str, d: usize, l: usize) -> (Operation, Operation) {
    use Operation::{Delete, Insert};

    let value = v.to_string();
    if p <= d {
        // Insert before (or touching) the deleted span: the span moves right.
        (
            Insert { position: p, value },
            Delete {
                position: d + v.chars().count(),
                length: l,
            },
        )
    } else if p >= d + l {
        // Insert after the span: it moves left by the deleted length.
        (
            Insert {
                position: p - l,
                value,
            },
            Delete {
                position: d,
                length: l,
            },
        )
    } else {
        // Insert lands inside the span: clamp to the span start.
        (
            Insert { position: d, value },
            Delete {
                position: d,
                length: l,
            },
        )
    }
}

/// Clip the delete `[pos, pos+len)` against another concurrent delete
/// `[other, other+other_len)`: the overlap is removed from `len`, and `pos`
/// shifts left by however much of the other delete lies before it.
fn clip_delete(pos: usize, len: usize, other: usize, other_len: usize) -> Operation {
    let end = pos + len;
    let other_end = other + other_len;
    let overlap = end.min(other_end).saturating_sub(pos.max(other));
    let shift = pos.min(other_end).saturating_sub(other.min(pos));
    Operation::Delete {
        position: pos - shift,
        length: len - overlap,
    }
}

/// Rebase `op` past every operation in `log`, in order, keeping the
/// incoming side of each pairwise transform. This is the fold the
/// coordinator runs over `operation_log[base_revision..]` before applying
/// a submission.
pub fn transform_against_log<'a, I>(op: Operation, log: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    log.into_iter()
        .fold(op, |acc, applied| transform(&acc, applied).0)
}
