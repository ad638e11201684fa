// Unverified access token decoding and expiry checks

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use serde_json::Value;

use super::types::{Credential, TokenClaims};
use crate::error::{ProbeError, Result};

/// Split a token into its three segments
fn segments(token: &str) -> Result<[&str; 3]> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    match parts.as_slice() {
        [header, payload, signature] if !payload.is_empty() => {
            Ok([*header, *payload, *signature])
        }
        _ => Err(ProbeError::TokenMalformed(format!(
            "expected 3 dot-separated segments, found {}",
            parts.len()
        ))),
    }
}

/// Decode a base64url segment, tolerating padding and the standard alphabet
fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| ProbeError::TokenMalformed(format!("payload is not base64: {}", e)))
}

/// Decode the payload claims without verifying the signature
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let [_, payload, _] = segments(token)?;
    let bytes = decode_segment(payload)?;
    let json: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProbeError::TokenMalformed(format!("payload is not JSON: {}", e)))?;

    let exp = json.get("exp").and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));

    // Issuers in this ecosystem put the user id in `sub`, older ones in `userId`
    let subject = ["sub", "userId"]
        .iter()
        .filter_map(|key| json.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    Ok(TokenClaims { exp, subject })
}

/// Subject claim of a token, if decodable
pub fn subject_of(token: &str) -> Option<String> {
    decode_claims(token).ok().and_then(|claims| claims.subject)
}

/// Check if the access token expires within `buffer_seconds` of now
pub fn is_expiring_soon(credential: &Credential, buffer_seconds: i64) -> bool {
    is_expiring_soon_at(&credential.access_token, buffer_seconds, Utc::now().timestamp())
}

/// Expiry check against an explicit clock
///
/// Malformed tokens count as expired so a refresh is attempted; tokens without
/// an `exp` claim count as non-expiring.
pub fn is_expiring_soon_at(token: &str, buffer_seconds: i64, now: i64) -> bool {
    match decode_claims(token) {
        Ok(TokenClaims { exp: Some(exp), .. }) => now.saturating_add(buffer_seconds) >= exp,
        Ok(TokenClaims { exp: None, .. }) => {
            tracing::warn!("Access token has no exp claim, treating it as non-expiring");
            false
        }
        Err(e) => {
            tracing::warn!("Access token could not be decoded ({}), treating it as expired", e);
            true
        }
    }
}
