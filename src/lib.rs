//! Purpose: Shared library crate behind the `memflight` CLI, server, and tests.
//! Exports: `api` (public surface) and `core` (encoding, kernels, codec, store, errors).
//! Role: In-memory columnar stream store with a put/get protocol and backpressure.
//! Invariants: Batches are immutable once committed; readers share them through `Arc`.
//! Invariants: Core modules prefer explicit inputs/outputs (arenas, options) over hidden state.
pub mod api;
pub mod core;
