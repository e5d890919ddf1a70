//! # scriba-ot — Operational Transformation engine for Scriba
//!
//! Pure, stateless text-operation algebra. No I/O, no shared state — the
//! coordinator in `scriba-collab` owns all mutation and calls into this
//! crate to rebase concurrent edits onto a single revision history.
//!
//! ## Architecture
//!
//! ```text
//!        client edit (base revision r)
//!                  │
//!                  ▼
//!    transform_against_log(op, log[r..])   ── rebase past unseen ops
//!                  │
//!                  ▼
//!            apply(content, op')           ── splice into the document
//!                  │
//!                  ▼
//!        revision r+1, log append
//! ```
//!
//! Positions and lengths are counted in Unicode scalar values, never bytes.
//!
//! Reference: Ellis & Gibbs 1989 — Concurrency Control in Groupware Systems

pub mod operation;
pub mod transform;

pub use operation::{apply, OtError, Operation};
pub use transform::{transform, transform_against_log};
