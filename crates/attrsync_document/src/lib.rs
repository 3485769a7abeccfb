//! # attrsync Document
//!
//! Structured document diff/merge algebra for attrsync.
//!
//! This crate provides:
//! - [`merge`] - recursive application of a diff onto a base document
//! - [`diff`] - minimal diff between two documents
//! - [`strip_nulls`] - removal of explicit nulls from authoritative state
//! - [`deep_eq`] - structural equality over document values
//!
//! This is a pure algebra crate with no I/O operations.
//!
//! ## Document model
//!
//! A document is a [`serde_json::Map`] from string keys to values, where a
//! value is a scalar (string, number, boolean, null), a nested document, or
//! an array. Key order is irrelevant; array order is significant. Arrays and
//! scalars are never element-merged, only replaced wholesale.
//!
//! ## Null convention
//!
//! `Value::Null` inside a *diff* is a tombstone: merging it with
//! [`NullMode::Remove`] deletes the key. Authoritative documents never
//! contain explicit nulls (callers strip them on ingest with
//! [`strip_nulls`]); a key that is "legitimately null" is simply absent.
//! Accumulator documents are merged with [`NullMode::Keep`] so tombstones
//! survive until they reach the server.
//!
//! ## Key Invariant
//!
//! For all documents `a` and `b`, `merge(a, diff(a, b), NullMode::Remove)`
//! makes `a` deep-equal to `b`. This inverse law anchors the correctness of
//! the state reconciliation built on top.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod algebra;

pub use algebra::{deep_eq, diff, merge, strip_nulls, Document, NullMode};
