//! Display-only decoding of bearer token claims.
//!
//! Nothing here verifies a signature or an expiry. The claims only feed what
//! the user sees (who is logged in, when the token runs out); whether a
//! request is allowed is decided by the server answering 401 or not.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;
use time::OffsetDateTime;

const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl Claims {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.email.is_none() && self.expires_at.is_none()
    }

    /// Cosmetic only, never consulted before sending a request.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Decodes the payload segment of a three-part token. Any malformed input
/// yields `None`.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let normalized = payload.replace('-', "+").replace('_', "/");
    let bytes = PAYLOAD_ENGINE.decode(normalized).ok()?;
    let json: Value = serde_json::from_slice(&bytes).ok()?;
    let object = json.as_object()?;

    let text = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let subject = text("username").or_else(|| text("sub")).or_else(|| text("name"));
    let expires_at = object
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());

    Some(Claims {
        subject,
        email: text("email"),
        expires_at,
    })
}
