//! HMAC-signed caller envelopes.
//!
//! An envelope carries a caller context plus a base64 HMAC-SHA256 signature
//! computed over the RFC 8785 canonical form of that context. The signature is
//! checked against the raw context as received so issuers are free to include
//! or omit optional fields.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gateway_primitives::CallerContext;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Result alias for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Shared secret used to verify envelopes. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Wraps secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmptySecret`] when the secret is empty.
    pub fn new(bytes: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self(bytes))
    }

    /// Returns the raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Caller-supplied signed context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    context: Value,
    signature: String,
}

impl CallEnvelope {
    /// Creates an envelope from a raw context and base64 signature.
    #[must_use]
    pub fn new(context: Value, signature: impl Into<String>) -> Self {
        Self {
            context,
            signature: signature.into(),
        }
    }

    /// Returns the raw context payload.
    #[must_use]
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// Returns the base64 signature.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Whether calls must carry an envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvelopeMode {
    /// Envelopes are verified when present; gateway defaults apply otherwise.
    #[default]
    Optional,
    /// Every call must carry a valid envelope.
    Required,
}

impl EnvelopeMode {
    /// Maps the `require` flag onto a mode.
    #[must_use]
    pub const fn from_required(required: bool) -> Self {
        if required { Self::Required } else { Self::Optional }
    }
}

/// Errors produced while authenticating a call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Envelope required but absent.
    #[error("signed call envelope required")]
    MissingEnvelope,
    /// Envelope present but no secret is configured to check it.
    #[error("no signing secret configured")]
    NoSecretConfigured,
    /// Secret material was empty.
    #[error("signing secret cannot be empty")]
    EmptySecret,
    /// Signature was not valid base64.
    #[error("envelope signature is not valid base64")]
    MalformedSignature,
    /// Signature did not match any accepted secret.
    #[error("envelope signature mismatch")]
    SignatureMismatch,
    /// Signed context could not be decoded into a caller context.
    #[error("invalid envelope context: {reason}")]
    InvalidContext {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

fn canonical_bytes(context: &Value) -> AuthResult<Vec<u8>> {
    serde_jcs::to_vec(context).map_err(|err| AuthError::InvalidContext {
        reason: err.to_string(),
    })
}

fn mac_for(secret: &SigningSecret, payload: &[u8]) -> AuthResult<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::EmptySecret)?;
    mac.update(payload);
    Ok(mac)
}

fn decode_context(context: &Value) -> AuthResult<CallerContext> {
    serde_json::from_value(context.clone()).map_err(|err| AuthError::InvalidContext {
        reason: err.to_string(),
    })
}

/// Signs a caller context, producing an envelope trusted issuers can attach.
///
/// # Errors
///
/// Returns [`AuthError::InvalidContext`] if the context cannot be canonicalized.
pub fn sign(context: &CallerContext, secret: &SigningSecret) -> AuthResult<CallEnvelope> {
    let raw = serde_json::to_value(context).map_err(|err| AuthError::InvalidContext {
        reason: err.to_string(),
    })?;
    let payload = canonical_bytes(&raw)?;
    let tag = mac_for(secret, &payload)?.finalize().into_bytes();
    Ok(CallEnvelope::new(raw, STANDARD.encode(tag)))
}

/// Verifies an envelope against a single secret in constant time.
///
/// # Errors
///
/// Returns [`AuthError::MalformedSignature`], [`AuthError::SignatureMismatch`],
/// or [`AuthError::InvalidContext`] when verification fails.
pub fn verify(envelope: &CallEnvelope, secret: &SigningSecret) -> AuthResult<CallerContext> {
    verify_any(envelope, std::slice::from_ref(secret))
}

fn verify_any(envelope: &CallEnvelope, secrets: &[SigningSecret]) -> AuthResult<CallerContext> {
    if secrets.is_empty() {
        return Err(AuthError::NoSecretConfigured);
    }
    let signature = STANDARD
        .decode(envelope.signature().trim())
        .map_err(|_| AuthError::MalformedSignature)?;
    let payload = canonical_bytes(envelope.context())?;

    // No early exit: every accepted secret is checked.
    let mut matched = false;
    for secret in secrets {
        matched |= mac_for(secret, &payload)?.verify_slice(&signature).is_ok();
    }
    if !matched {
        return Err(AuthError::SignatureMismatch);
    }

    decode_context(envelope.context())
}

/// Authenticates calls according to the configured [`EnvelopeMode`].
#[derive(Clone, Debug, Default)]
pub struct EnvelopeAuthenticator {
    mode: EnvelopeMode,
    secrets: Vec<SigningSecret>,
}

impl EnvelopeAuthenticator {
    /// Creates an authenticator accepting any of the supplied secrets.
    #[must_use]
    pub fn new(mode: EnvelopeMode, secrets: Vec<SigningSecret>) -> Self {
        Self { mode, secrets }
    }

    /// Returns the configured mode.
    #[must_use]
    pub const fn mode(&self) -> EnvelopeMode {
        self.mode
    }

    /// Resolves the verified caller context for a call.
    ///
    /// Returns `Ok(None)` when no envelope was supplied and envelopes are
    /// optional, meaning the gateway defaults apply. A supplied envelope that
    /// fails verification is rejected in either mode.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingEnvelope`] in required mode without an
    /// envelope, or any verification error.
    pub fn authenticate(
        &self,
        envelope: Option<&CallEnvelope>,
    ) -> AuthResult<Option<CallerContext>> {
        match (envelope, self.mode) {
            (None, EnvelopeMode::Optional) => Ok(None),
            (None, EnvelopeMode::Required) => Err(AuthError::MissingEnvelope),
            (Some(envelope), _) => {
                let context = verify_any(envelope, &self.secrets)?;
                debug!(
                    initiator = context.initiator_id(),
                    trace_id = %context.trace_id(),
                    "call envelope verified"
                );
                Ok(Some(context))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use gateway_primitives::TraceId;
    use serde_json::json;

    fn secret(value: &str) -> SigningSecret {
        SigningSecret::new(value.as_bytes().to_vec()).unwrap()
    }

    fn context() -> CallerContext {
        CallerContext::new("alice", "tok-1", "billing", "prod", TraceId::new("trace-X").unwrap())
            .with_roles(["finance"])
    }

    #[test]
    fn signed_envelope_verifies() {
        let key = secret("s3cret");
        let envelope = sign(&context(), &key).unwrap();
        let verified = verify(&envelope, &key).unwrap();
        assert_eq!(verified, context());
    }

    #[test]
    fn tampered_context_is_rejected() {
        let key = secret("s3cret");
        let envelope = sign(&context(), &key).unwrap();
        let mut raw = envelope.context().clone();
        raw["initiatorId"] = json!("mallory");
        let tampered = CallEnvelope::new(raw, envelope.signature());
        assert_eq!(verify(&tampered, &key), Err(AuthError::SignatureMismatch));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let envelope = sign(&context(), &secret("one")).unwrap();
        assert_eq!(
            verify(&envelope, &secret("two")),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn key_order_does_not_affect_signature() {
        let key = secret("s3cret");
        let envelope = sign(&context(), &key).unwrap();
        let reordered: Value = serde_json::from_str(
            r#"{"traceId":"trace-X","roles":["finance"],"environment":"prod","appId":"billing","tokenRef":"tok-1","initiatorId":"alice"}"#,
        )
        .unwrap();
        let envelope = CallEnvelope::new(reordered, envelope.signature());
        assert!(verify(&envelope, &key).is_ok());
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let envelope = CallEnvelope::new(serde_json::to_value(context()).unwrap(), "***");
        assert_eq!(
            verify(&envelope, &secret("s3cret")),
            Err(AuthError::MalformedSignature)
        );
    }

    fn signed_with_trace(key: &SigningSecret, trace_id: &str) -> CallEnvelope {
        let raw = json!({
            "initiatorId": "alice", "tokenRef": "t", "appId": "a",
            "environment": "prod", "traceId": trace_id
        });
        let tag = mac_for(key, &canonical_bytes(&raw).unwrap())
            .unwrap()
            .finalize()
            .into_bytes();
        CallEnvelope::new(raw, STANDARD.encode(tag))
    }

    #[test]
    fn empty_trace_id_is_rejected() {
        let key = secret("s3cret");
        assert!(matches!(
            verify(&signed_with_trace(&key, "  "), &key),
            Err(AuthError::InvalidContext { .. })
        ));
    }

    #[test]
    fn oversized_trace_id_is_rejected() {
        let key = secret("s3cret");
        let envelope = signed_with_trace(&key, &"t".repeat(4096));
        assert!(matches!(
            verify(&envelope, &key),
            Err(AuthError::InvalidContext { .. })
        ));
        assert!(verify(&signed_with_trace(&key, "trace-ok"), &key).is_ok());
    }

    #[test]
    fn required_mode_rejects_missing_envelope() {
        let auth = EnvelopeAuthenticator::new(EnvelopeMode::Required, vec![secret("k")]);
        assert_eq!(auth.authenticate(None), Err(AuthError::MissingEnvelope));
    }

    #[test]
    fn optional_mode_uses_defaults_but_rejects_bad_envelopes() {
        let auth = EnvelopeAuthenticator::new(EnvelopeMode::Optional, vec![secret("k")]);
        assert_eq!(auth.authenticate(None), Ok(None));

        let forged = sign(&context(), &secret("other")).unwrap();
        assert_eq!(
            auth.authenticate(Some(&forged)),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn rotated_secrets_are_accepted() {
        let auth = EnvelopeAuthenticator::new(
            EnvelopeMode::Required,
            vec![secret("current"), secret("previous")],
        );
        let envelope = sign(&context(), &secret("previous")).unwrap();
        let verified = auth.authenticate(Some(&envelope)).unwrap().unwrap();
        assert_eq!(verified.trace_id().as_str(), "trace-X");
    }

    #[test]
    fn envelope_without_secrets_is_rejected() {
        let auth = EnvelopeAuthenticator::new(EnvelopeMode::Optional, Vec::new());
        let envelope = sign(&context(), &secret("k")).unwrap();
        assert_eq!(
            auth.authenticate(Some(&envelope)),
            Err(AuthError::NoSecretConfigured)
        );
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", secret("hunter2")), "SigningSecret(<redacted>)");
        assert_eq!(SigningSecret::new(Vec::new()), Err(AuthError::EmptySecret));
    }
}
