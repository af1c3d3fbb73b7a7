//! Bearer credentials and the claims carried in their payload.
//!
//! Tokens are decoded without checking the signature; the server remains the authority
//! on whether a token is accepted. Locally the claims only answer who the token belongs
//! to and until when it may be used.

use crate::model::{
    Id,
    user::{User, UserMarker, Username},
};
use base64::{
    DecodeError, Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::Deserialize;
use std::fmt::{Debug, Formatter};
use thiserror::Error;
use time::{UtcDateTime, error::ComponentRange};

pub const CREDENTIAL_SEGMENT_COUNT: usize = 3;

/// base64url as used for token segments; padding is accepted but not required.
pub const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum CredentialDecodeError {
    #[error("Expected {CREDENTIAL_SEGMENT_COUNT} segments separated by '.', found {0}")]
    SegmentCount(usize),
    #[error("Decoding base64 payload failed: {0}")]
    Base64(#[from] DecodeError),
    #[error("Payload is not a valid claims object: {0}")]
    Claims(#[from] serde_json::Error),
    #[error("Timestamp claim is out of range: {0}")]
    Timestamp(#[from] ComponentRange),
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Credential(String);

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Claims {
    pub user: User,
    pub issued_at: Option<UtcDateTime>,
    pub expires_at: UtcDateTime,
}

#[derive(Deserialize)]
struct ClaimsPayload {
    id: Id<UserMarker>,
    username: Username,
    #[serde(default)]
    iat: Option<i64>,
    exp: i64,
}

impl Credential {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn decode(&self) -> Result<Claims, CredentialDecodeError> {
        let segments: Vec<&str> = self.0.split('.').collect();
        let [_header, payload, _signature] = segments[..] else {
            return Err(CredentialDecodeError::SegmentCount(segments.len()));
        };

        let payload = SEGMENT_ENGINE.decode(payload)?;
        let claims: ClaimsPayload = serde_json::from_slice(&payload)?;

        Ok(Claims {
            user: User {
                id: claims.id,
                username: claims.username,
            },
            issued_at: claims
                .iat
                .map(UtcDateTime::from_unix_timestamp)
                .transpose()?,
            expires_at: UtcDateTime::from_unix_timestamp(claims.exp)?,
        })
    }
}

impl Claims {
    /// Whether the credential may still be used at `now`. Expiry is exclusive.
    #[must_use]
    pub fn is_live_at(&self, now: UtcDateTime) -> bool {
        self.expires_at > now
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&"[redacted]").finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::auth::{Credential, CredentialDecodeError, SEGMENT_ENGINE};
    use base64::Engine;
    use serde_json::{Value, json};
    use time::{Duration, UtcDateTime, macros::utc_datetime};

    fn encode_token(claims: &Value) -> Credential {
        let header = SEGMENT_ENGINE.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = SEGMENT_ENGINE.encode(claims.to_string());
        Credential::new(format!("{header}.{payload}.signature"))
    }

    #[test]
    fn decode_claims() {
        let credential = encode_token(&json!({
            "id": 7,
            "username": "ada",
            "iat": 1_760_000_000,
            "exp": 1_760_003_600,
        }));

        let claims = credential.decode().unwrap();
        assert_eq!(claims.user.id.get(), 7);
        assert_eq!(claims.user.username.get(), "ada");
        assert_eq!(
            claims.issued_at,
            Some(UtcDateTime::from_unix_timestamp(1_760_000_000).unwrap())
        );
        assert_eq!(
            claims.expires_at,
            UtcDateTime::from_unix_timestamp(1_760_003_600).unwrap()
        );
    }

    #[test]
    fn decode_accepts_padded_payload_and_missing_iat() {
        let payload =
            base64::prelude::BASE64_URL_SAFE.encode(r#"{"id":1,"username":"bob","exp":10}"#);
        assert!(payload.ends_with('='));
        let credential = Credential::new(format!("header.{payload}.sig"));

        let claims = credential.decode().unwrap();
        assert_eq!(claims.issued_at, None);
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        assert!(matches!(
            Credential::new("only.two".to_owned()).decode(),
            Err(CredentialDecodeError::SegmentCount(2))
        ));
        assert!(matches!(
            Credential::new("a.b.c.d".to_owned()).decode(),
            Err(CredentialDecodeError::SegmentCount(4))
        ));
        assert!(matches!(
            Credential::new("header.!!!.sig".to_owned()).decode(),
            Err(CredentialDecodeError::Base64(_))
        ));

        let not_json = SEGMENT_ENGINE.encode("not json");
        assert!(matches!(
            Credential::new(format!("header.{not_json}.sig")).decode(),
            Err(CredentialDecodeError::Claims(_))
        ));

        let without_expiry = encode_token(&json!({ "id": 1, "username": "bo" }));
        assert!(matches!(
            without_expiry.decode(),
            Err(CredentialDecodeError::Claims(_))
        ));

        let absurd_expiry = encode_token(&json!({ "id": 1, "username": "bo", "exp": i64::MAX }));
        assert!(matches!(
            absurd_expiry.decode(),
            Err(CredentialDecodeError::Timestamp(_))
        ));
    }

    #[test]
    fn liveness_is_exclusive_of_expiry() {
        let now = utc_datetime!(2026-01-01 12:00);
        let credential = encode_token(&json!({
            "id": 1,
            "username": "bo",
            "exp": now.unix_timestamp(),
        }));
        let claims = credential.decode().unwrap();

        assert!(!claims.is_live_at(now));
        assert!(!claims.is_live_at(now + Duration::seconds(1)));
        assert!(claims.is_live_at(now - Duration::seconds(1)));
    }

    #[test]
    fn long_username_decodes() {
        let name = "a".repeat(51);
        let credential = encode_token(&json!({
            "id": 1,
            "username": name,
            "exp": 1_760_003_600,
        }));

        let claims = credential.decode().unwrap();
        assert_eq!(claims.user.username.get(), name);
    }

    #[test]
    fn debug_redacts_token() {
        let credential = Credential::new("secret.token.value".to_owned());
        assert_eq!(format!("{credential:?}"), r#"Credential("[redacted]")"#);
    }
}
