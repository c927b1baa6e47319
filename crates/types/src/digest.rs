//! Container image digest parsing.
//!
//! Every execution is pinned to a `sha256:<64 hex>` digest; this module is
//! the only place that parses and normalizes them. Parsing is
//! case-insensitive, output is always lowercase.

/// Normalizes a digest string of the form `sha256:<64 hex>`.
///
/// Returns `None` when the input is not a well-formed sha256 digest.
pub fn normalize_digest(input: &str) -> Option<String> {
    let lowered = input.trim().to_ascii_lowercase();
    let hex_part = lowered.strip_prefix("sha256:")?;
    if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(lowered)
    } else {
        None
    }
}

/// Extracts the digest from an image reference containing `@sha256:…`.
///
/// Returns the normalized digest when present and well formed; `None` when
/// the reference carries no digest. A reference with a malformed digest
/// after `@` is treated as carrying no digest, so callers fall through to
/// resolution (docker) or rejection (kubernetes).
pub fn digest_from_ref(image_ref: &str) -> Option<String> {
    let (_, digest) = image_ref.rsplit_once('@')?;
    normalize_digest(digest)
}

/// Whether a reference is digest-pinned.
pub fn is_pinned(image_ref: &str) -> bool {
    digest_from_ref(image_ref).is_some()
}
