//! Helpers for building unverifiable test tokens

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;

/// JWT with the given JSON claims and a signature nobody can verify
pub fn token_with_claims(claims: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims);
    format!("{header}.{payload}.signature")
}

/// Unverifiable JWT carrying only an `exp` claim
pub fn token_with_exp(exp: i64) -> String {
    token_with_claims(&format!(r#"{{"exp":{exp}}}"#))
}

/// Unverifiable JWT expiring `secs` seconds from now
pub fn token_expiring_in(secs: i64) -> String {
    token_with_exp(Utc::now().timestamp() + secs)
}
