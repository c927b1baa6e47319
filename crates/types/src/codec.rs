//! The canonical JSON codec behind every integrity hash in the system.
//!
//! All records carry an `integrity_sha256` computed over their canonical
//! serialization, and the reproducibility fingerprint (`execution_hash`) and
//! the policy `context_sha256` use the same rule. Canonicalization follows
//! RFC 8785 (JCS) via `serde_jcs`: object keys sorted, insignificant
//! whitespace stripped, numbers in their shortest round-trippable form. Two
//! producers of the same logical record therefore compute the same hash.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CodecError;

/// Serializes a value to its canonical JSON byte representation.
///
/// The value is first flattened through `serde_json::Value` so that struct
/// field order is irrelevant, then re-serialized under JCS rules. Values
/// that JSON cannot represent (NaN, infinities) fail with
/// [`CodecError::Serialization`].
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_value(value)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    serde_jcs::to_vec(&json).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The integrity hash of a record: SHA-256 over its canonical JSON form.
pub fn integrity_sha256<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(sha256_hex(&canonical_json_bytes(value)?))
}

/// The integrity hash of a record that itself stores the hash: the
/// `integrity_sha256` field is removed before canonicalization, so sealing
/// a record and re-verifying it later use the same input bytes.
pub fn record_integrity<T: Serialize>(record: &T) -> Result<String, CodecError> {
    let mut json = serde_json::to_value(record)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    if let Some(obj) = json.as_object_mut() {
        obj.remove("integrity_sha256");
    }
    let bytes =
        serde_jcs::to_vec(&json).map_err(|e| CodecError::Serialization(e.to_string()))?;
    Ok(sha256_hex(&bytes))
}

/// Serde helpers pinning timestamps to RFC 3339 with nanosecond precision
/// in UTC, so canonical bytes do not depend on the producer's formatting
/// defaults. Use as `#[serde(with = "animus_types::codec::ts")]`.
pub mod ts {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    /// Same pinning for optional timestamps.
    pub mod option {
        use super::*;

        pub fn serialize<S>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let opt = Option::<String>::deserialize(deserializer)?;
            match opt {
                None => Ok(None),
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}
