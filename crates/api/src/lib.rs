#![forbid(unsafe_code)]

//! Ports consumed by the Animus core.
//!
//! The core never talks to docker, kubernetes, an object store or a
//! relational database directly; it talks to the traits defined here.
//! `animus-executors` and `animus-storage` supply the implementations, and
//! tests substitute their own.

pub mod executor;
pub mod gate;
pub mod identity;
pub mod object_store;
pub mod report;
pub mod store;
