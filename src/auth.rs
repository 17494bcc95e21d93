//! Bearer token validation for the `/api` routes.
//!
//! Tokens are HS256 JWTs signed with `JWT_KEY`. Issuer and audience are
//! checked when configured; expiry is always checked.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use crate::config::JwtSettings;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

pub struct BearerAuth {
    key: DecodingKey,
    validation: Validation,
}

impl BearerAuth {
    pub fn new(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        match &settings.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(settings.key.as_bytes()),
            validation,
        }
    }

    /// Validate the value of an `Authorization` header.
    fn verify(&self, header: Option<&str>) -> Result<(), ApiError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ApiError::Unauthorized(format!("invalid token: {}", e)))?;
        debug!("Authenticated subject: {:?}", data.claims.sub);
        Ok(())
    }
}

/// Middleware rejecting requests without a valid bearer token.
pub async fn require_bearer(
    State(auth): State<Arc<BearerAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    auth.verify(header)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        iss: &'a str,
        aud: &'a str,
        exp: u64,
    }

    fn settings() -> JwtSettings {
        JwtSettings {
            key: "signing-key".to_string(),
            issuer: Some("ocr-issuer".to_string()),
            audience: Some("ocr-clients".to_string()),
        }
    }

    fn token(key: &str, iss: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as u64;
        encode(
            &Header::new(Algorithm::HS256),
            &TestClaims {
                sub: "cooperativa-1",
                iss,
                aud: "ocr-clients",
                exp,
            },
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = BearerAuth::new(&settings());
        let header = format!("Bearer {}", token("signing-key", "ocr-issuer", 3600));
        assert!(auth.verify(Some(&header)).is_ok());
    }

    #[test]
    fn test_rejections() {
        let auth = BearerAuth::new(&settings());
        assert!(auth.verify(None).is_err());
        assert!(auth.verify(Some("Basic abc")).is_err());
        assert!(auth.verify(Some("Bearer ")).is_err());

        let wrong_key = format!("Bearer {}", token("other-key", "ocr-issuer", 3600));
        assert!(auth.verify(Some(&wrong_key)).is_err());

        let wrong_issuer = format!("Bearer {}", token("signing-key", "someone-else", 3600));
        assert!(auth.verify(Some(&wrong_issuer)).is_err());

        let expired = format!("Bearer {}", token("signing-key", "ocr-issuer", -3600));
        assert!(auth.verify(Some(&expired)).is_err());
    }
}
