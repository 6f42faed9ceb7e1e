//! # `ex-std`
//!
//! "std extensions" that the other `ex-*` crates can use without pulling in
//! any dependencies.
//!
//! Traits, macros, and small helper types are all fair game here so long as
//! they do NOT depend on anything outside of [`std`].

/// Exponential backoff iterator, used by the HTTP client's retry loop.
pub mod backoff;
/// `const`-evaluable assertions.
pub mod const_utils;
/// [`std::fmt::Display`] helpers for iterators and slices.
pub mod fmt;
