//! Bearer tokens.
//!
//! A token carries [`Claims`] and proves the server issued them. It does
//! not prove the session still exists: callers compare the claims with
//! current session state on every use.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tenure_protocol::{Claims, SessionId};

use crate::TokenError;

/// Signs and verifies bearer tokens.
pub trait TokenIssuer: Send + Sync + 'static {
    /// Produces a signed token for `claims`.
    fn issue(&self, claims: &Claims) -> Result<String, TokenError>;

    /// Checks the signature and expiry of `token` and returns its claims.
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;

    /// How long freshly issued tokens stay valid.
    fn lifetime(&self) -> Duration;

    /// Claims for a new token for `sub`, expiring [`lifetime`](Self::lifetime)
    /// from now.
    fn claims_for(&self, sub: &str, session_id: &SessionId) -> Claims {
        let lifetime = chrono::Duration::from_std(self.lifetime())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        Claims {
            sub: sub.to_string(),
            session_id: session_id.clone(),
            exp: (chrono::Utc::now() + lifetime).timestamp(),
        }
    }
}

/// HS256 JSON Web Tokens with a shared secret.
pub struct JwtIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl JwtIssuer {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; a token one second past `exp` is expired.
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer for JwtIssuer {
    fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Issue(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> JwtIssuer {
        JwtIssuer::new(b"test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_verify_issued_token_returns_claims() {
        let issuer = issuer();
        let claims = issuer.claims_for("alice", &SessionId::from("s-1"));
        let token = issuer.issue(&claims).unwrap();

        let verified = issuer.verify(&token).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn test_verify_expired_token_returns_expired() {
        let issuer = issuer();
        let claims = Claims {
            sub: "alice".into(),
            session_id: SessionId::from("s-1"),
            exp: chrono::Utc::now().timestamp() - 10,
        };
        let token = issuer.issue(&claims).unwrap();

        assert_eq!(issuer.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_verify_foreign_secret_returns_invalid_signature() {
        let other = JwtIssuer::new(b"other-secret", Duration::from_secs(3600));
        let claims = other.claims_for("alice", &SessionId::from("s-1"));
        let token = other.issue(&claims).unwrap();

        assert_eq!(issuer().verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_verify_garbage_returns_malformed() {
        assert!(matches!(
            issuer().verify("not-a-token"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_claims_for_expires_after_lifetime() {
        let issuer = JwtIssuer::new(b"k", Duration::from_secs(120));
        let now = chrono::Utc::now().timestamp();
        let claims = issuer.claims_for("bob", &SessionId::from("s"));
        assert!((claims.exp - now - 120).abs() <= 1);
        assert_eq!(claims.sub, "bob");
    }
}
