//! Auth Gate (C5, spec.md §4.5): issues and validates the HMAC-signed JWTs
//! that authenticate a caller's `user_id`, and enforces revocation via the
//! token blacklist.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::blacklist::BlacklistStore;
use crate::error::OrchestrationError;

/// `ACCESS_TOKEN_TTL` default (spec.md §6.4).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
/// `REFRESH_TOKEN_TTL` default.
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Minimum acceptable secret length, to keep callers from passing in a
/// throwaway string (spec.md §4.5: "no hardcoded fallback").
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Decoded and verified token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated caller id, echoed into `RequestContext::user_id`.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique token id, the blacklist's revocation key.
    pub jti: String,
    pub token_type: TokenType,
}

/// Issues, validates, and revokes caller tokens (spec.md §4.5). Construction
/// fails closed: both secrets are required from the environment with no
/// built-in fallback, and must meet [`MIN_SECRET_BYTES`].
pub struct AuthGate {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    blacklist: Arc<dyn BlacklistStore>,
    blacklist_fail_open: bool,
}

impl AuthGate {
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        blacklist: Arc<dyn BlacklistStore>,
        blacklist_fail_open: bool,
    ) -> Result<Self, OrchestrationError> {
        if access_secret.len() < MIN_SECRET_BYTES {
            return Err(OrchestrationError::InvalidConfig(format!(
                "AUTH_ACCESS_SECRET must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        if refresh_secret.len() < MIN_SECRET_BYTES {
            return Err(OrchestrationError::InvalidConfig(format!(
                "AUTH_REFRESH_SECRET must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            blacklist,
            blacklist_fail_open,
        })
    }

    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn issue_access_token(&self, user_id: &str) -> Result<String, OrchestrationError> {
        self.issue(user_id, TokenType::Access, self.access_ttl, &self.access_encoding)
    }

    pub fn issue_refresh_token(&self, user_id: &str) -> Result<String, OrchestrationError> {
        self.issue(user_id, TokenType::Refresh, self.refresh_ttl, &self.refresh_encoding)
    }

    fn issue(
        &self,
        user_id: &str,
        token_type: TokenType,
        ttl: Duration,
        key: &EncodingKey,
    ) -> Result<String, OrchestrationError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type,
        };
        encode(&Header::default(), &claims, key)
            .map_err(|e| OrchestrationError::Other(format!("token signing failed: {e}")))
    }

    /// Verify signature, expiry, and (for access tokens) revocation status.
    /// Does not consult the blacklist for refresh tokens — callers that
    /// revoke a refresh token are expected to also revoke derived access
    /// tokens individually.
    pub fn validate(&self, token: &str, expect: TokenType) -> Result<Claims, OrchestrationError> {
        let (decoding_key, validation) = match expect {
            TokenType::Access => (&self.access_decoding, Validation::default()),
            TokenType::Refresh => (&self.refresh_decoding, Validation::default()),
        };
        let data = decode::<Claims>(token, decoding_key, &validation)
            .map_err(|e| OrchestrationError::Unauthenticated(e.to_string()))?;
        if data.claims.token_type != expect {
            return Err(OrchestrationError::Unauthenticated("wrong token type".into()));
        }
        Ok(data.claims)
    }

    /// `validate` plus the blacklist check, the gate callers outside this
    /// module should use (spec.md §4.5).
    pub fn require_auth(&self, token: &str) -> Result<Claims, OrchestrationError> {
        let claims = self.validate(token, TokenType::Access)?;
        match self.blacklist.is_revoked(&claims.jti) {
            Ok(true) => Err(OrchestrationError::Unauthenticated("token revoked".into())),
            Ok(false) => Ok(claims),
            Err(_) if self.blacklist_fail_open => Ok(claims),
            Err(reason) => Err(OrchestrationError::Unauthenticated(format!(
                "blacklist lookup failed: {reason}"
            ))),
        }
    }

    /// Revoke `token` (access or refresh) for the remainder of its natural
    /// lifetime.
    pub fn revoke(&self, token: &str, token_type: TokenType) -> Result<(), OrchestrationError> {
        let claims = self.validate(token, token_type)?;
        let remaining = (claims.exp - chrono::Utc::now().timestamp()).max(0);
        self.blacklist.revoke(&claims.jti, Duration::from_secs(remaining as u64));
        Ok(())
    }
}
