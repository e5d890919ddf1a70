//! Property tests for the transform algebra.
//!
//! The diamond law is checked over randomly generated concurrent pairs.
//! Two corners are policy-resolved rather than diamond-convergent (inserts
//! at the identical position, and an insert strictly inside a concurrently
//! deleted span — a single-span delete cannot split around a surviving
//! insert); those are excluded here and pinned by deterministic unit tests
//! in `src/transform.rs`. Client convergence rests on the server's total
//! order, not on these corners.

use proptest::prelude::*;
use scriba_ot::{apply, transform, transform_against_log, Operation};

fn arb_doc() -> impl Strategy<Value = String> {
    // Mix of ASCII and multibyte so codepoint indexing is exercised.
    proptest::string::string_regex("[a-z0-9 éß日本語]{0,24}").unwrap()
}

fn arb_op(doc_len: usize) -> BoxedStrategy<Operation> {
    let insert = (0..=doc_len, "[A-Zé日]{1,4}")
        .prop_map(|(position, value)| Operation::Insert { position, value });
    let delete = (0..=doc_len).prop_flat_map(move |position| {
        (Just(position), 0..=(doc_len - position))
            .prop_map(|(position, length)| Operation::Delete { position, length })
    });
    prop_oneof![insert, delete].boxed()
}

/// A document plus two operations valid against that same document.
fn arb_concurrent_pair() -> impl Strategy<Value = (String, Operation, Operation)> {
    arb_doc().prop_flat_map(|doc| {
        let len = doc.chars().count();
        (Just(doc), arb_op(len), arb_op(len))
    })
}

/// The two policy corners excluded from the diamond law.
fn policy_corner(a: &Operation, b: &Operation) -> bool {
    use Operation::{Delete, Insert};
    match (a, b) {
        (Insert { position: pa, .. }, Insert { position: pb, .. }) => pa == pb,
        (
            Insert { position: p, .. },
            Delete {
                position: d,
                length: l,
            },
        )
        | (
            Delete {
                position: d,
                length: l,
            },
            Insert { position: p, .. },
        ) => *d < *p && *p < d + l,
        _ => false,
    }
}

proptest! {
    #[test]
    fn diamond_property_holds((doc, a, b) in arb_concurrent_pair()) {
        prop_assume!(!policy_corner(&a, &b));

        let (b_prime, _) = transform(&b, &a);
        let (a_prime, _) = transform(&a, &b);
        let left = apply(&apply(&doc, &a).unwrap(), &b_prime).unwrap();
        let right = apply(&apply(&doc, &b).unwrap(), &a_prime).unwrap();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn transform_preserves_applicability((doc, incoming, applied) in arb_concurrent_pair()) {
        // Whatever the pair, the rebased incoming op must apply cleanly to
        // the document that already absorbed the applied op.
        let base = apply(&doc, &applied).unwrap();
        let (incoming_prime, _) = transform(&incoming, &applied);
        prop_assert!(apply(&base, &incoming_prime).is_ok());
    }

    #[test]
    fn log_fold_stays_applicable(
        (doc, op, first) in arb_concurrent_pair(),
    ) {
        // Build a two-entry history: `first` commits, then a second edit
        // derived from the new document. The stale `op` rebased past the
        // whole log must still apply.
        let after_first = apply(&doc, &first).unwrap();
        let tail_len = after_first.chars().count();
        let second = Operation::Delete {
            position: 0,
            length: tail_len.min(2),
        };
        let after_second = apply(&after_first, &second).unwrap();

        let rebased = transform_against_log(op, [&first, &second]);
        prop_assert!(apply(&after_second, &rebased).is_ok());
    }
}
