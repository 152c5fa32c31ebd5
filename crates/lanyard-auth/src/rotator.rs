//! Refresh-token rotation over the shared key-value store.
//!
//! A user holds up to [`RotatorConfig::capacity`] live refresh tokens
//! (one per device). The live set stores only token hashes. Rotation
//! swaps the presented hash for a fresh one in a single compare-and-swap
//! of the whole set, so a refresh token presented twice concurrently
//! yields exactly one new pair; the loser sees the hash gone and gets
//! [`AuthError::TokenAlreadyUsed`].

use std::sync::Arc;

use lanyard_core::DeleteRequest;
use lanyard_core::KeyValueStore;
use lanyard_core::KeyValueStoreError;
use lanyard_core::ReadRequest;
use lanyard_core::WriteRequest;
use lanyard_core::constants::MAX_CAS_RETRIES;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::AuthError;
use crate::token::SignedToken;
use crate::token::TokenClaims;
use crate::token::TokenSigner;
use crate::token::TokenUse;
use crate::token::TokenVerifier;
use crate::token::current_time_secs;

/// Key prefix for per-user refresh-token sets.
const REFRESH_SET_PREFIX: &str = "__auth:refresh:";

fn refresh_set_key(user_id: &str) -> String {
    format!("{REFRESH_SET_PREFIX}{user_id}")
}

/// Configuration for [`TokenRotator`].
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Access-token lifetime in seconds.
    pub access_ttl_secs: u64,
    /// Refresh-token lifetime in seconds.
    pub refresh_ttl_secs: u64,
    /// Live refresh tokens per user; the oldest is evicted beyond this.
    pub capacity: usize,
    /// CAS attempts on the set before giving up.
    pub max_cas_retries: u32,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            capacity: 5,
            max_cas_retries: MAX_CAS_RETRIES,
        }
    }
}

/// The credentials handed to a client.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Short-lived access token, base64.
    pub access_token: String,
    /// Single-use refresh token, base64.
    pub refresh_token: String,
}

/// One live refresh token, stored by hash only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct RefreshEntry {
    /// Hex BLAKE3 hash of the encoded token.
    hash: String,
    /// The token's jti, for tracing.
    jti: String,
    /// Unix seconds the token was issued.
    issued_at: u64,
    /// Unix seconds the token expires.
    expires_at: u64,
}

/// A user's live refresh tokens, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct RefreshTokenSet {
    entries: Vec<RefreshEntry>,
}

impl RefreshTokenSet {
    fn prune_expired(&mut self, now: u64) {
        self.entries.retain(|e| e.expires_at > now);
    }
}

/// Issues, rotates, and revokes token pairs for users.
pub struct TokenRotator<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    signer: TokenSigner,
    verifier: TokenVerifier,
    config: RotatorConfig,
}

impl<S: KeyValueStore + ?Sized> TokenRotator<S> {
    /// Create a rotator signing with `signer`.
    pub fn new(store: Arc<S>, signer: TokenSigner, config: RotatorConfig) -> Self {
        let verifier = TokenVerifier::new(signer.verifying_key());
        Self {
            store,
            signer,
            verifier,
            config,
        }
    }

    /// Verifier for tokens this rotator signs, for API-layer access
    /// token checks.
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.signer.verifying_key())
    }

    /// Issue a fresh token pair at login.
    ///
    /// The new refresh token joins the user's live set; past capacity
    /// the oldest entry is evicted, logging out that device.
    pub async fn issue(&self, user_id: &str, role: &str) -> Result<TokenPair, AuthError> {
        let key = refresh_set_key(user_id);
        for _ in 0..self.config.max_cas_retries {
            let read = self.store.read(ReadRequest::new(&key)).await?;
            let (expected, mut set) = match &read.kv {
                None => (None, RefreshTokenSet::default()),
                Some(kv) => (Some(kv.value.clone()), self.parse_set(user_id, &kv.value)?),
            };

            let (pair, entry) = self.mint_pair(user_id, role)?;
            let now = current_time_secs();
            set.prune_expired(now);
            set.entries.push(entry);
            while set.entries.len() > self.config.capacity {
                let evicted = set.entries.remove(0);
                debug!(%user_id, jti = %evicted.jti, "evicted oldest refresh token at capacity");
            }

            match self
                .store
                .write(WriteRequest::compare_and_swap(&key, expected, self.encode_set(&set)?))
                .await
            {
                Ok(_) => {
                    debug!(%user_id, live = set.entries.len(), "issued token pair");
                    return Ok(pair);
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::MaxRetriesExceeded {
            user_id: user_id.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }

    /// Exchange a refresh token for a fresh pair, exactly once.
    ///
    /// The presented token must be validly signed, unexpired, and still
    /// a member of its user's live set. The swap of its hash for the
    /// replacement's is one CAS, so concurrent presentations of the same
    /// token resolve to one winner.
    pub async fn rotate(&self, presented: &str) -> Result<TokenPair, AuthError> {
        let token = SignedToken::from_base64(presented).map_err(|_| AuthError::InvalidOrExpired)?;
        self.verifier.verify(&token, TokenUse::Refresh)?;
        let presented_hash = token.hash_hex()?;
        let user_id = token.claims.subject.clone();
        let key = refresh_set_key(&user_id);

        for _ in 0..self.config.max_cas_retries {
            let read = self.store.read(ReadRequest::new(&key)).await?;
            let Some(kv) = read.kv else {
                warn!(%user_id, jti = %token.claims.jti, "refresh token presented but user has no live set");
                return Err(AuthError::TokenAlreadyUsed);
            };
            let mut set = self.parse_set(&user_id, &kv.value)?;

            let Some(position) = set.entries.iter().position(|e| e.hash == presented_hash) else {
                // Reuse of a rotated-out token. Worth an operator's eye:
                // it can indicate a stolen token replayed after the
                // legitimate client already rotated.
                warn!(%user_id, jti = %token.claims.jti, "rotated-out refresh token presented again");
                return Err(AuthError::TokenAlreadyUsed);
            };

            let (pair, entry) = self.mint_pair(&user_id, &token.claims.role)?;
            set.entries[position] = entry;
            set.prune_expired(current_time_secs());

            match self
                .store
                .write(WriteRequest::compare_and_swap(
                    &key,
                    Some(kv.value),
                    self.encode_set(&set)?,
                ))
                .await
            {
                Ok(_) => {
                    debug!(%user_id, old_jti = %token.claims.jti, "rotated refresh token");
                    return Ok(pair);
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    // Another writer touched the set; re-read. If the
                    // concurrent writer was rotating this same token,
                    // the next pass finds the hash gone.
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::MaxRetriesExceeded {
            user_id,
            attempts: self.config.max_cas_retries,
        })
    }

    /// Remove one refresh token from its user's live set.
    ///
    /// Works on expired tokens too (logout after an idle session), and
    /// is idempotent: revoking a token that is already gone succeeds.
    pub async fn revoke(&self, presented: &str) -> Result<(), AuthError> {
        let token = SignedToken::from_base64(presented).map_err(|_| AuthError::InvalidOrExpired)?;
        let presented_hash = token.hash_hex()?;
        let user_id = token.claims.subject.clone();
        let key = refresh_set_key(&user_id);

        for _ in 0..self.config.max_cas_retries {
            let read = self.store.read(ReadRequest::new(&key)).await?;
            let Some(kv) = read.kv else {
                return Ok(());
            };
            let mut set = self.parse_set(&user_id, &kv.value)?;
            let before = set.entries.len();
            set.entries.retain(|e| e.hash != presented_hash);
            if set.entries.len() == before {
                return Ok(());
            }

            match self
                .store
                .write(WriteRequest::compare_and_swap(
                    &key,
                    Some(kv.value),
                    self.encode_set(&set)?,
                ))
                .await
            {
                Ok(_) => {
                    info!(%user_id, jti = %token.claims.jti, "refresh token revoked");
                    return Ok(());
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::MaxRetriesExceeded {
            user_id,
            attempts: self.config.max_cas_retries,
        })
    }

    /// Drop a user's entire live set, logging out every device.
    pub async fn revoke_all(&self, user_id: &str) -> Result<(), AuthError> {
        self.store
            .delete(DeleteRequest::new(refresh_set_key(user_id)))
            .await?;
        info!(%user_id, "all refresh tokens revoked");
        Ok(())
    }

    fn mint_pair(&self, user_id: &str, role: &str) -> Result<(TokenPair, RefreshEntry), AuthError> {
        let access = self
            .signer
            .sign(TokenClaims::new(user_id, role, TokenUse::Access, self.config.access_ttl_secs))?;
        let refresh = self
            .signer
            .sign(TokenClaims::new(user_id, role, TokenUse::Refresh, self.config.refresh_ttl_secs))?;
        let entry = RefreshEntry {
            hash: refresh.hash_hex()?,
            jti: refresh.claims.jti.clone(),
            issued_at: refresh.claims.issued_at,
            expires_at: refresh.claims.expires_at,
        };
        Ok((
            TokenPair {
                access_token: access.to_base64()?,
                refresh_token: refresh.to_base64()?,
            },
            entry,
        ))
    }

    fn parse_set(&self, user_id: &str, raw: &str) -> Result<RefreshTokenSet, AuthError> {
        serde_json::from_str(raw).map_err(|e| AuthError::CorruptedSet {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode_set(&self, set: &RefreshTokenSet) -> Result<String, AuthError> {
        serde_json::to_string(set).map_err(|e| AuthError::Encoding {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use lanyard_core::test_support::DeterministicKeyValueStore;

    use super::*;

    fn rotator(store: Arc<DeterministicKeyValueStore>) -> TokenRotator<DeterministicKeyValueStore> {
        TokenRotator::new(store, TokenSigner::generate(), RotatorConfig::default())
    }

    #[tokio::test]
    async fn issue_then_rotate_exactly_once() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        let pair = r.issue("user-1", "exhibitor").await?;
        let rotated = r.rotate(&pair.refresh_token).await?;

        // The spent token is rejected; the replacement works.
        assert!(matches!(
            r.rotate(&pair.refresh_token).await,
            Err(AuthError::TokenAlreadyUsed)
        ));
        r.rotate(&rotated.refresh_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn rotated_pair_keeps_subject_and_role() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);
        let verifier = r.verifier();

        let pair = r.issue("user-9", "organizer").await?;
        let rotated = r.rotate(&pair.refresh_token).await?;

        let access = SignedToken::from_base64(&rotated.access_token)?;
        verifier.verify(&access, TokenUse::Access)?;
        assert_eq!(access.claims.subject, "user-9");
        assert_eq!(access.claims.role, "organizer");
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_rotation_has_one_winner() {
        let store = DeterministicKeyValueStore::new();
        let r = Arc::new(rotator(store));
        let pair = r.issue("user-1", "exhibitor").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = r.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { r.rotate(&token).await }));
        }

        let mut winners = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AuthError::TokenAlreadyUsed) => already_used += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1, "exactly one rotation must win");
        assert_eq!(already_used, 7);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_token() {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        let first = r.issue("user-1", "exhibitor").await.unwrap();
        let mut later = Vec::new();
        for _ in 0..RotatorConfig::default().capacity {
            later.push(r.issue("user-1", "exhibitor").await.unwrap());
        }

        // The first token fell off the back of the set.
        assert!(matches!(
            r.rotate(&first.refresh_token).await,
            Err(AuthError::TokenAlreadyUsed)
        ));
        // Every remaining token still rotates.
        for pair in later {
            r.rotate(&pair.refresh_token).await.unwrap();
        }
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_next_write() {
        let store = DeterministicKeyValueStore::new();
        let r = TokenRotator::new(store.clone(), TokenSigner::generate(), RotatorConfig::default());

        let stale = RefreshTokenSet {
            entries: vec![RefreshEntry {
                hash: "deadbeef".to_string(),
                jti: "old".to_string(),
                issued_at: 1,
                expires_at: 2,
            }],
        };
        store
            .write(WriteRequest::set(
                refresh_set_key("user-1"),
                serde_json::to_string(&stale).unwrap(),
            ))
            .await
            .unwrap();

        r.issue("user-1", "exhibitor").await.unwrap();

        let read = store
            .read(ReadRequest::new(refresh_set_key("user-1")))
            .await
            .unwrap();
        let set: RefreshTokenSet = serde_json::from_str(&read.kv.unwrap().value).unwrap();
        assert_eq!(set.entries.len(), 1);
        assert_ne!(set.entries[0].jti, "old");
    }

    #[tokio::test]
    async fn garbage_and_foreign_tokens_are_rejected() {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        assert!(matches!(
            r.rotate("not-a-token").await,
            Err(AuthError::InvalidOrExpired)
        ));

        // Signed by someone else's key.
        let foreign = TokenSigner::generate()
            .sign(TokenClaims::new("user-1", "exhibitor", TokenUse::Refresh, 3600))
            .unwrap();
        assert!(matches!(
            r.rotate(&foreign.to_base64().unwrap()).await,
            Err(AuthError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let store = DeterministicKeyValueStore::new();
        let signer = TokenSigner::generate();
        let mut claims = TokenClaims::new("user-1", "exhibitor", TokenUse::Refresh, 3600);
        claims.issued_at = current_time_secs() - 7_200;
        claims.expires_at = current_time_secs() - 3_600;
        let expired = signer.sign(claims).unwrap();

        let r = TokenRotator::new(store, signer, RotatorConfig::default());
        assert!(matches!(
            r.rotate(&expired.to_base64().unwrap()).await,
            Err(AuthError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn access_token_cannot_be_rotated() {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        let pair = r.issue("user-1", "exhibitor").await.unwrap();
        assert!(matches!(
            r.rotate(&pair.access_token).await,
            Err(AuthError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_blocks_rotation() {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        let pair = r.issue("user-1", "exhibitor").await.unwrap();
        r.revoke(&pair.refresh_token).await.unwrap();
        r.revoke(&pair.refresh_token).await.unwrap();

        assert!(matches!(
            r.rotate(&pair.refresh_token).await,
            Err(AuthError::TokenAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn revoke_all_logs_out_every_device() {
        let store = DeterministicKeyValueStore::new();
        let r = rotator(store);

        let a = r.issue("user-1", "exhibitor").await.unwrap();
        let b = r.issue("user-1", "exhibitor").await.unwrap();
        r.revoke_all("user-1").await.unwrap();

        for pair in [a, b] {
            assert!(matches!(
                r.rotate(&pair.refresh_token).await,
                Err(AuthError::TokenAlreadyUsed)
            ));
        }
    }
}
