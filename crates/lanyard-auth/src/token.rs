//! Signed token structure, encoding, and verification.
//!
//! Tokens are self-contained: a holder of the issuer's public key can
//! verify one offline with only the current time. Claims are postcard
//! encoded, Ed25519 signed, and shipped as URL-safe base64.

use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;
use lanyard_core::now_unix_ms;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AuthError;

/// Maximum encoded token size in bytes.
pub const MAX_TOKEN_SIZE: u32 = 4 * 1024;

/// Clock skew tolerance when checking token validity windows.
pub const TOKEN_CLOCK_SKEW_SECS: u64 = 30;

/// Current Unix time in seconds.
pub(crate) fn current_time_secs() -> u64 {
    now_unix_ms() / 1_000
}

/// The purpose a token was minted for.
///
/// A refresh token presented where an access token is expected (or vice
/// versa) fails verification even when its signature is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenUse {
    /// Short-lived credential presented on API calls.
    Access,
    /// Long-lived credential exchanged for a new pair on rotation.
    Refresh,
}

/// The signed statement inside a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject: the user this token authenticates.
    pub subject: String,
    /// Role granted to the subject (e.g. "exhibitor", "organizer").
    pub role: String,
    /// What the token is for.
    pub token_use: TokenUse,
    /// Unique token id, for tracing a token through the live set.
    pub jti: String,
    /// Unix timestamp (seconds) when the token was issued.
    pub issued_at: u64,
    /// Unix timestamp (seconds) when the token expires.
    pub expires_at: u64,
}

impl TokenClaims {
    /// Claims valid from now for `ttl_secs`.
    pub fn new(subject: impl Into<String>, role: impl Into<String>, token_use: TokenUse, ttl_secs: u64) -> Self {
        let now = current_time_secs();
        Self {
            subject: subject.into(),
            role: role.into(),
            token_use,
            jti: Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + ttl_secs,
        }
    }
}

/// A token: claims plus the issuer's signature over their encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedToken {
    /// The signed statement.
    pub claims: TokenClaims,
    /// Ed25519 signature over the postcard-encoded claims.
    #[serde(with = "signature_serde")]
    pub signature: [u8; 64],
}

impl SignedToken {
    /// Encode to bytes for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, AuthError> {
        let bytes = postcard::to_allocvec(self).map_err(|e| AuthError::Encoding {
            reason: e.to_string(),
        })?;
        if bytes.len() > MAX_TOKEN_SIZE as usize {
            return Err(AuthError::TokenTooLarge {
                size: bytes.len() as u64,
                max: MAX_TOKEN_SIZE as u64,
            });
        }
        Ok(bytes)
    }

    /// Decode from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, AuthError> {
        if bytes.len() > MAX_TOKEN_SIZE as usize {
            return Err(AuthError::TokenTooLarge {
                size: bytes.len() as u64,
                max: MAX_TOKEN_SIZE as u64,
            });
        }
        postcard::from_bytes(bytes).map_err(|e| AuthError::Encoding {
            reason: e.to_string(),
        })
    }

    /// Encode to URL-safe base64 for text transmission.
    pub fn to_base64(&self) -> Result<String, AuthError> {
        use base64::Engine;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.encode()?))
    }

    /// Decode from URL-safe base64.
    pub fn from_base64(s: &str) -> Result<Self, AuthError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| AuthError::Encoding {
                reason: e.to_string(),
            })?;
        Self::decode(&bytes)
    }

    /// BLAKE3 hash of the encoded token, hex encoded.
    ///
    /// This is what the refresh-token set stores: the set never holds
    /// token material, only hashes to match presented tokens against.
    pub fn hash_hex(&self) -> Result<String, AuthError> {
        let bytes = self.encode()?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Signs tokens with an Ed25519 key.
pub struct TokenSigner {
    key: SigningKey,
}

impl TokenSigner {
    /// Signer with a freshly generated key.
    ///
    /// Tokens signed by it do not survive a process restart; production
    /// deployments load a persistent key with [`TokenSigner::from_bytes`].
    pub fn generate() -> Self {
        Self {
            key: SigningKey::from_bytes(&rand::random::<[u8; 32]>()),
        }
    }

    /// Signer from a persistent 32-byte secret key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    /// The public key verifiers need.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign claims into a token.
    pub fn sign(&self, claims: TokenClaims) -> Result<SignedToken, AuthError> {
        let bytes = bytes_to_sign(&claims)?;
        let signature = self.key.sign(&bytes);
        Ok(SignedToken {
            claims,
            signature: signature.to_bytes(),
        })
    }
}

/// Verifies token signatures and validity windows.
pub struct TokenVerifier {
    key: VerifyingKey,
    clock_skew_tolerance: u64,
}

impl TokenVerifier {
    /// Verifier for tokens signed by `key`.
    pub fn new(key: VerifyingKey) -> Self {
        Self {
            key,
            clock_skew_tolerance: TOKEN_CLOCK_SKEW_SECS,
        }
    }

    /// Override the clock skew tolerance.
    pub fn with_clock_skew_tolerance(mut self, seconds: u64) -> Self {
        self.clock_skew_tolerance = seconds;
        self
    }

    /// Verify signature, validity window, and intended use.
    pub fn verify(&self, token: &SignedToken, expected_use: TokenUse) -> Result<(), AuthError> {
        let bytes = bytes_to_sign(&token.claims)?;
        let signature = Signature::from_bytes(&token.signature);
        self.key
            .verify(&bytes, &signature)
            .map_err(|_| AuthError::InvalidOrExpired)?;

        let now = current_time_secs();
        if token.claims.expires_at + self.clock_skew_tolerance < now {
            return Err(AuthError::InvalidOrExpired);
        }
        if token.claims.issued_at > now + self.clock_skew_tolerance {
            return Err(AuthError::InvalidOrExpired);
        }
        if token.claims.token_use != expected_use {
            return Err(AuthError::InvalidOrExpired);
        }
        Ok(())
    }
}

/// The byte string the signature covers: the postcard-encoded claims.
fn bytes_to_sign(claims: &TokenClaims) -> Result<Vec<u8>, AuthError> {
    postcard::to_allocvec(claims).map_err(|e| AuthError::Encoding {
        reason: e.to_string(),
    })
}

/// Serde helper for Ed25519 signatures (64 bytes).
mod signature_serde {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(sig)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(d)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom(format!("expected 64 bytes, got {}", bytes.len())));
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&bytes);
        Ok(sig)
    }
}
