//! Token issuance and single-use refresh rotation.
//!
//! Every session holds a short-lived access token and a long-lived
//! refresh token. Presenting the refresh token yields a fresh pair and
//! invalidates the presented token in the same atomic step: a replay of
//! a spent token is detected rather than honored. Tokens are Ed25519
//! signed and verified offline; only hashes of live refresh tokens are
//! stored.

#![warn(missing_docs)]

mod error;
mod rotator;
mod token;

pub use error::AuthError;
pub use rotator::RotatorConfig;
pub use rotator::TokenPair;
pub use rotator::TokenRotator;
pub use token::MAX_TOKEN_SIZE;
pub use token::SignedToken;
pub use token::TOKEN_CLOCK_SKEW_SECS;
pub use token::TokenClaims;
pub use token::TokenSigner;
pub use token::TokenUse;
pub use token::TokenVerifier;
