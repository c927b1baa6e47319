#![forbid(unsafe_code)]

//! Core domain types for the Animus control plane.
//!
//! Everything that crosses a crate boundary lives here: the run/execution
//! entities, the policy and approval model, ledger and evidence documents,
//! the append-only audit and lineage event shapes, the canonical JSON codec
//! used for every integrity hash, and the stable error codes the API
//! surface returns.

pub mod audit;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod digest;
pub mod error;
pub mod evidence;
pub mod execution;
pub mod ids;
pub mod ledger;
pub mod policy;
pub mod run;
pub mod scm;
