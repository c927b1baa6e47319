//! Opaque identifier minting.
//!
//! Identifiers are prefixed UUIDv4 strings (`run_9f3b…`). The prefix makes
//! ids self-describing in logs and audit payloads; nothing ever parses them
//! back apart.

use uuid::Uuid;

/// Mints a new identifier with the given entity prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
