//! Device token signing for chat history server authentication.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifetime of a minted token.
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Claims carried by a device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub device_id: String,
    /// Absolute expiry as a UTC unix timestamp
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing key is not configured")]
    MissingKey,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// HS256 signer binding a device id to a one hour expiry.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Option<String>,
}

impl TokenSigner {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Mint a fresh token for `device_id`. Tokens are never cached.
    pub fn sign(&self, device_id: &str) -> Result<String, SignerError> {
        let secret = self.secret.as_deref().ok_or(SignerError::MissingKey)?;

        let claims = DeviceClaims {
            device_id: device_id.to_string(),
            exp: (Utc::now() + Duration::seconds(TOKEN_TTL_SECS)).timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Check signature and expiry of a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<DeviceClaims, SignerError> {
        let secret = self.secret.as_deref().ok_or(SignerError::MissingKey)?;

        let data = decode::<DeviceClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(Some("test-secret-key".to_string()))
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let token = signer.sign("device-1").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.device_id, "device-1");
    }

    #[test]
    fn test_expiry_is_one_hour_ahead() {
        let before = Utc::now().timestamp();
        let token = signer().sign("device-1").unwrap();
        let after = Utc::now().timestamp();

        let claims = signer().verify(&token).unwrap();
        assert!(claims.exp >= before + TOKEN_TTL_SECS);
        assert!(claims.exp <= after + TOKEN_TTL_SECS);
    }

    #[test]
    fn test_header_uses_hs256() {
        let token = signer().sign("device-1").unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
    }

    #[test]
    fn test_missing_key() {
        let signer = TokenSigner::new(None);
        assert!(matches!(signer.sign("device-1"), Err(SignerError::MissingKey)));
    }

    #[test]
    fn test_verify_wrong_secret() {
        let token = signer().sign("device-1").unwrap();
        let other = TokenSigner::new(Some("different-secret".to_string()));
        assert!(matches!(other.verify(&token), Err(SignerError::Jwt(_))));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let claims = DeviceClaims {
            device_id: "device-1".to_string(),
            exp: Utc::now().timestamp() - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key"),
        )
        .unwrap();

        assert!(signer().verify(&token).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("test-secret-key"));
    }
}
