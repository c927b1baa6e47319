//! Run-scoped bearer tokens and CI webhook signatures.
//!
//! Both are HMAC-SHA256 over the service secrets, base64url raw encoded.
//! The run token binds a container to `(run_id, dataset_version_id,
//! expires_at)`; the webhook signature binds a CI payload to a timestamp
//! and body hash with bounded clock skew.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use animus_types::codec::sha256_hex;
use animus_types::error::{AuthError, CoreError};

type HmacSha256 = Hmac<Sha256>;

/// Version prefix of run tokens.
pub const RUN_TOKEN_PREFIX: &str = "animus_run_v1";

/// CI webhook signature headers.
pub const CI_TS_HEADER: &str = "x-animus-ci-ts";
pub const CI_SIG_HEADER: &str = "x-animus-ci-sig";

/// Claims carried inside a run token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTokenClaims {
    pub run_id: String,
    pub dataset_version_id: String,
    /// Expiry as unix seconds.
    pub exp: i64,
}

fn mac_b64(secret: &str, input: &[u8]) -> Result<String, CoreError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("hmac key: {e}")))?;
    mac.update(input);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Mints an `animus_run_v1.<claims>.<sig>` token.
pub fn mint_run_token(secret: &str, claims: &RunTokenClaims) -> Result<String, CoreError> {
    let claims_json = serde_json::to_vec(claims)
        .map_err(|e| CoreError::Internal(format!("token claims: {e}")))?;
    let claims_b64 = URL_SAFE_NO_PAD.encode(claims_json);
    let signing_input = format!("{RUN_TOKEN_PREFIX}.{claims_b64}");
    let sig = mac_b64(secret, signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{sig}"))
}

/// SHA-256 of the full token string; this is what the execution row
/// persists instead of the token itself.
pub fn run_token_sha256(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// Verifies a run token against the service secret.
///
/// Accepted iff the HMAC verifies, the claimed `run_id` matches
/// `expected_run_id`, and `exp` is in the future.
pub fn verify_run_token(
    secret: &str,
    token: &str,
    expected_run_id: &str,
    now: DateTime<Utc>,
) -> Result<RunTokenClaims, CoreError> {
    let unauthorized = |msg: &str| CoreError::from(AuthError::Unauthorized(msg.to_string()));

    let mut parts = token.splitn(3, '.');
    let (prefix, claims_b64, sig) = match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(c), Some(s)) => (p, c, s),
        _ => return Err(unauthorized("malformed run token")),
    };
    if prefix != RUN_TOKEN_PREFIX {
        return Err(unauthorized("unknown token version"));
    }

    let signing_input = format!("{prefix}.{claims_b64}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("hmac key: {e}")))?;
    mac.update(signing_input.as_bytes());
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| unauthorized("malformed token signature"))?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| unauthorized("token signature mismatch"))?;

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| unauthorized("malformed token claims"))?;
    let claims: RunTokenClaims = serde_json::from_slice(&claims_json)
        .map_err(|_| unauthorized("malformed token claims"))?;

    if claims.run_id != expected_run_id {
        return Err(unauthorized("token is scoped to a different run"));
    }
    if claims.exp <= now.timestamp() {
        return Err(unauthorized("token expired"));
    }
    Ok(claims)
}

/// The string a CI webhook signature covers: `ts\nMETHOD\nhex(sha256(body))`.
fn webhook_signing_input(ts: &str, method: &str, body: &[u8]) -> String {
    format!("{ts}\n{method}\n{}", sha256_hex(body))
}

/// Signs a webhook request (used by tests and by CI client tooling).
pub fn sign_webhook(
    secret: &str,
    ts: &str,
    method: &str,
    body: &[u8],
) -> Result<String, CoreError> {
    mac_b64(secret, webhook_signing_input(ts, method, body).as_bytes())
}

/// Verifies the CI webhook headers against the shared secret.
pub fn verify_webhook(
    secret: &str,
    ts: &str,
    sig: &str,
    method: &str,
    body: &[u8],
    now: DateTime<Utc>,
    max_skew: Duration,
) -> Result<(), CoreError> {
    let unauthorized = |msg: &str| CoreError::from(AuthError::Unauthorized(msg.to_string()));

    let ts_secs: i64 = ts.parse().map_err(|_| unauthorized("malformed timestamp"))?;
    let skew = (now.timestamp() - ts_secs).unsigned_abs();
    if skew > max_skew.as_secs() {
        return Err(unauthorized("webhook timestamp outside accepted skew"));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("hmac key: {e}")))?;
    mac.update(webhook_signing_input(ts, method, body).as_bytes());
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| unauthorized("malformed webhook signature"))?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| unauthorized("webhook signature mismatch"))?;
    Ok(())
}
