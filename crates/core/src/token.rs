//! Access token expiry decoding
//!
//! Only the `exp` claim is read, and the signature is never checked: the
//! client uses it to schedule a refresh, the server stays the authority on
//! validity.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

static EXPIRY_ONLY: LazyLock<Validation> = LazyLock::new(|| {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
});

/// Expiration instant of a JWT, or `None` when it cannot be decoded
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let data = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &EXPIRY_ONLY).ok()?;
    DateTime::from_timestamp(data.claims.exp?, 0)
}

/// Time left before `token` expires. Negative once expired.
pub fn remaining_lifetime(token: &str, now: DateTime<Utc>) -> Option<Duration> {
    decode_expiry(token).map(|exp| exp - now)
}

/// True when `token` expires in less than `lookahead`.
///
/// Undecodable tokens are never considered to be expiring.
pub fn expires_within(token: &str, now: DateTime<Utc>, lookahead: Duration) -> bool {
    remaining_lifetime(token, now).is_some_and(|left| left < lookahead)
}
