//! Session validity derived from the locally stored bearer token.
//!
//! Only the payload segment is read. The signature is never checked here:
//! the backend re-validates the token on every authenticated request, so a
//! forged payload can at worst make the client *believe* it is logged in.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value as JsonValue};

use crate::storage::TokenStore;

/// Standard alphabet, padding optional, trailing bits tolerated.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Why a token's payload could not be turned into [`Claims`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("no token")]
    Absent,
    #[error("token is not three dot-separated segments")]
    Malformed,
    #[error("payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Claims decoded from an untrusted token payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    inner: Map<String, JsonValue>,
}

impl Claims {
    /// Raw value of claim `key`, if present.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.inner.get(key)
    }

    /// Expiry (`exp`) in whole seconds since the epoch.
    ///
    /// Fractional values are floored; non-numeric values count as absent.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        let exp = self.inner.get("exp")?;
        exp.as_i64().or_else(|| {
            exp.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.floor() as i64)
        })
    }

    /// Subject (`sub`), which the backend sets to the user id.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.inner.get("sub").and_then(JsonValue::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.inner
    }
}

/// Trims the token; empty and whitespace-only tokens count as absent.
pub(crate) fn normalize(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

/// Decodes the payload segment of a `header.payload.signature` token.
///
/// # Errors
///
/// Returns the [`DecodeError`] variant for the first step that failed.
pub fn decode_claims(token: Option<&str>) -> Result<Claims, DecodeError> {
    let token = normalize(token).ok_or(DecodeError::Absent)?;

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(DecodeError::Malformed);
    };
    if payload.is_empty() {
        return Err(DecodeError::Malformed);
    }

    let payload: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    let text = String::from_utf8(bytes)?;

    match serde_json::from_str::<JsonValue>(&text)? {
        JsonValue::Object(inner) => Ok(Claims { inner }),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Current time in whole seconds since the epoch.
#[must_use]
pub fn now_seconds() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Returns `true` unless the token decodes and its `exp` is at or after `now`.
#[must_use]
pub fn is_token_expired_at(token: Option<&str>, now: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => match claims.expires_at() {
            Some(exp) => exp < now,
            None => {
                tracing::debug!("token payload has no exp claim");
                true
            }
        },
        Err(DecodeError::Absent) => true,
        Err(e) => {
            tracing::debug!(error = %e, "token could not be decoded");
            true
        }
    }
}

/// [`is_token_expired_at`] against the system clock.
#[must_use]
pub fn is_token_expired(token: Option<&str>) -> bool {
    is_token_expired_at(token, now_seconds())
}

/// Reads the stored token and reports whether it is present and unexpired.
///
/// A storage read failure counts as logged out.
pub fn check_is_logged_in<S: TokenStore + ?Sized>(store: &S) -> bool {
    match store.load() {
        Ok(token) => normalize(token.as_deref()).is_some() && !is_token_expired(token.as_deref()),
        Err(e) => {
            tracing::warn!(error = %e, "could not read stored token");
            false
        }
    }
}

#[cfg(test)]
pub(crate) fn make_token(payload: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload),
        URL_SAFE_NO_PAD.encode("signature"),
    )
}
