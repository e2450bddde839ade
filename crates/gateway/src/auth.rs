//! Access-token minting and verification.
//!
//! An access token is `v1.<user_id>.<refresh_id>.<expires_unix>.<mac>`
//! where `mac` is HMAC-SHA256 over the first four fields. The embedded
//! refresh id binds the access token to its refresh token: once the
//! refresh token is purged from the KV store, every access token minted
//! from it is rejected.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use parley_domain::config::AuthConfig;
use parley_domain::error::{Error, Result};
use parley_store::KvStore;

type HmacSha256 = Hmac<Sha256>;

/// Verified identity extracted from an access token.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub user_id: i64,
    pub refresh_id: String,
}

pub struct AuthTokens {
    secret: Vec<u8>,
    config: AuthConfig,
    kv: Arc<KvStore>,
}

impl AuthTokens {
    /// Read the signing secret from the configured env var; fall back to
    /// a random per-process secret (tokens then die with the process).
    pub fn new(config: AuthConfig, kv: Arc<KvStore>) -> Self {
        let secret = match std::env::var(&config.secret_env) {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                tracing::warn!(
                    env = %config.secret_env,
                    "auth secret not set; using a random per-process secret"
                );
                let mut bytes = [0u8; 32];
                rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
                bytes.to_vec()
            }
        };
        Self { secret, config, kv }
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.config.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.config.refresh_ttl_secs)
    }

    pub fn login_code_ttl(&self) -> Duration {
        Duration::from_secs(self.config.login_code_ttl_secs)
    }

    fn mac(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint an access token bound to the given refresh token.
    pub fn mint_access(&self, user_id: i64, refresh_id: &str) -> String {
        let expires = chrono::Utc::now().timestamp() + self.config.access_ttl_secs as i64;
        let payload = format!("v1.{user_id}.{refresh_id}.{expires}");
        let mac = hex::encode(self.mac(&payload));
        format!("{payload}.{mac}")
    }

    /// Verify signature, expiry, and the liveness of the refresh token.
    pub fn verify_access(&self, token: &str) -> Result<TokenClaims> {
        let parts: Vec<&str> = token.split('.').collect();
        let [version, user_id, refresh_id, expires, mac] = parts.as_slice() else {
            return Err(Error::Auth("malformed token".into()));
        };
        if *version != "v1" {
            return Err(Error::Auth("unsupported token version".into()));
        }

        let payload = format!("{version}.{user_id}.{refresh_id}.{expires}");
        let expected = self.mac(&payload);
        let provided = hex::decode(mac).map_err(|_| Error::Auth("malformed token".into()))?;
        if expected.ct_eq(&provided).unwrap_u8() != 1 {
            return Err(Error::Auth("invalid token signature".into()));
        }

        let expires: i64 = expires
            .parse()
            .map_err(|_| Error::Auth("malformed token".into()))?;
        if chrono::Utc::now().timestamp() >= expires {
            return Err(Error::Auth("token expired".into()));
        }

        let user_id: i64 = user_id
            .parse()
            .map_err(|_| Error::Auth("malformed token".into()))?;

        // Purged refresh token invalidates every access token minted
        // from it.
        match self.kv.get_refresh_token(refresh_id) {
            Some(owner) if owner == user_id => Ok(TokenClaims {
                user_id,
                refresh_id: refresh_id.to_string(),
            }),
            _ => Err(Error::Auth("refresh token revoked".into())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> (AuthTokens, Arc<KvStore>) {
        let kv = Arc::new(KvStore::new());
        let auth = AuthTokens::new(AuthConfig::default(), kv.clone());
        (auth, kv)
    }

    #[test]
    fn mint_and_verify_round_trip() {
        let (auth, kv) = auth();
        kv.save_refresh_token("r1", 42, Duration::from_secs(60));

        let token = auth.mint_access(42, "r1");
        let claims = auth.verify_access(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.refresh_id, "r1");
    }

    #[test]
    fn purged_refresh_token_rejects_access() {
        let (auth, kv) = auth();
        kv.save_refresh_token("r1", 42, Duration::from_secs(60));
        let token = auth.mint_access(42, "r1");

        kv.delete_refresh_token("r1");
        assert!(auth.verify_access(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let (auth, kv) = auth();
        kv.save_refresh_token("r1", 42, Duration::from_secs(60));
        let token = auth.mint_access(42, "r1");

        // Claim a different user id.
        let tampered = token.replacen("v1.42.", "v1.1.", 1);
        assert!(auth.verify_access(&tampered).is_err());

        // Garbage.
        assert!(auth.verify_access("not-a-token").is_err());
        assert!(auth.verify_access("").is_err());
    }

    #[test]
    fn refresh_owned_by_other_user_is_rejected() {
        let (auth, kv) = auth();
        kv.save_refresh_token("r1", 7, Duration::from_secs(60));
        let token = auth.mint_access(42, "r1");
        assert!(auth.verify_access(&token).is_err());
    }
}
