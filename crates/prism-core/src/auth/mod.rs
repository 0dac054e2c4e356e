//! JWT token validation for API and WebSocket authentication.
//!
//! Tokens are issued by the auth service; this module validates them and
//! extracts the owning user. Token creation is kept for refresh flows and
//! tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid or expired token: {0}")]
    Invalid(String),
    #[error("Token missing 'sub' claim")]
    MissingSubject,
    #[error("Subject is not a valid user id: {0}")]
    BadSubject(String),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub expiry_hours: i64,
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>, algorithm: &str, expiry_hours: i64) -> Result<Self, TokenError> {
        let algorithm = match algorithm.to_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => return Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        };
        Ok(Self {
            secret: secret.into(),
            algorithm,
            expiry_hours,
        })
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".to_string(),
            algorithm: Algorithm::HS256,
            expiry_hours: 24,
        }
    }
}

/// JWT claims carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Validates tokens and extracts the authenticated user.
#[derive(Clone)]
pub struct TokenValidator {
    config: TokenConfig,
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl TokenValidator {
    pub fn new(config: TokenConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            decoding_key,
            encoding_key,
        }
    }

    /// Create an access token for a user.
    pub fn create_access_token(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.config.expiry_hours)).timestamp(),
            token_type: None,
        };
        encode(&Header::new(self.config.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Create a longer-lived refresh token (7 days).
    pub fn create_refresh_token(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::days(7)).timestamp(),
            token_type: Some("refresh".to_string()),
        };
        encode(&Header::new(self.config.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Decode and validate a token.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let validation = Validation::new(self.config.algorithm);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Validate a token and return the owning user id.
    pub fn authenticate(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims = self.decode(token)?;
        if claims.sub.is_empty() {
            return Err(TokenError::MissingSubject);
        }
        claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| TokenError::BadSubject(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(TokenConfig {
            secret: "test-secret".to_string(),
            algorithm: Algorithm::HS256,
            expiry_hours: 1,
        })
    }

    #[test]
    fn test_access_token_round_trip() {
        let v = validator();
        let user_id = Uuid::new_v4();
        let token = v.create_access_token(user_id, "dana@example.com").unwrap();

        let claims = v.decode(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "dana@example.com");
        assert!(claims.token_type.is_none());

        assert_eq!(v.authenticate(&token).unwrap(), user_id);
    }

    #[test]
    fn test_refresh_token_is_typed() {
        let v = validator();
        let token = v
            .create_refresh_token(Uuid::new_v4(), "dana@example.com")
            .unwrap();
        let claims = v.decode(&token).unwrap();
        assert_eq!(claims.token_type.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let v = validator();
        let token = v.create_access_token(Uuid::new_v4(), "a@b.c").unwrap();

        let other = TokenValidator::new(TokenConfig {
            secret: "different-secret".to_string(),
            algorithm: Algorithm::HS256,
            expiry_hours: 1,
        });
        assert!(matches!(other.decode(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = TokenValidator::new(TokenConfig {
            secret: "test-secret".to_string(),
            algorithm: Algorithm::HS256,
            expiry_hours: -1,
        });
        let token = v.create_access_token(Uuid::new_v4(), "a@b.c").unwrap();
        assert!(v.decode(&token).is_err());
    }

    #[test]
    fn test_garbage_subject_rejected() {
        let v = validator();
        let now = Utc::now();
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            email: String::new(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            token_type: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(v.authenticate(&token), Err(TokenError::BadSubject(_))));
    }
}
