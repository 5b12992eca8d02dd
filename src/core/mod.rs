// Core modules implementing columnar encoding, kernels, the IPC codec, and the store.
pub mod batch;
pub mod buffer;
pub mod compare;
pub mod error;
pub mod ipc;
pub mod schema;
pub mod search;
pub mod sort;
pub mod store;
pub mod vector;
