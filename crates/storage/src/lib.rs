#![forbid(unsafe_code)]

//! In-memory reference implementations of the Animus store ports.
//!
//! [`MemStore`] serializes transactions on a single lock, which is a
//! strictly stronger guarantee than the row-level minimum the port
//! documents. It backs single-process deployments and every test in the
//! workspace. [`MemObjectStore`] is a keyed byte map with the same
//! interface an S3-style backend would implement.

mod memory;
mod object;

pub use memory::MemStore;
pub use object::MemObjectStore;
