//! Operator session tokens
//!
//! HS256 JWTs issued after a posting-key login. The token names the Hive
//! account and is accepted by every hub; hub scoping happens per request.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::PortalError;

const ISSUER: &str = "hubkeeper";
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Hive account that signed the login message
    pub username: String,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks session tokens with one shared secret
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, PortalError> {
        if secret.trim().len() < MIN_SECRET_LEN {
            return Err(PortalError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if expiry_seconds == 0 {
            return Err(PortalError::Config("JWT_EXPIRY_SECONDS must be positive".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiry_seconds,
        })
    }

    pub fn generate_token(&self, username: &str, role: &str) -> Result<String, PortalError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            username: username.to_string(),
            role: role.to_string(),
            iss: ISSUER.to_string(),
            iat: now,
            exp: now.saturating_add(self.expiry_seconds as i64),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| PortalError::Internal(format!("Failed to issue session token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, PortalError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "Session expired",
                    ErrorKind::InvalidSignature => "Session signature mismatch",
                    ErrorKind::InvalidIssuer => "Session issued elsewhere",
                    _ => "Malformed session token",
                };
                PortalError::Unauthorized(reason.into())
            })
    }

    /// Claims for an `Authorization` header value
    pub fn authorize(&self, auth_header: Option<&str>) -> Result<Claims, PortalError> {
        let token = bearer_token(auth_header)
            .ok_or_else(|| PortalError::Unauthorized("No session token provided".into()))?;
        self.verify_token(token)
    }
}

/// `Bearer <token>`, or a bare token with no scheme
pub fn bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?.trim();
    let token = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => header,
    };
    Some(token).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "session-secret-for-hubkeeper-tests-000";

    fn validator() -> JwtValidator {
        JwtValidator::new(SECRET.into(), 3600).unwrap()
    }

    #[test]
    fn test_issue_then_authorize() {
        let jwt = validator();
        let token = jwt.generate_token("city-admin", "admin").unwrap();

        let claims = jwt.authorize(Some(&format!("Bearer {}", token))).unwrap();
        assert_eq!(claims.username, "city-admin");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.iss, "hubkeeper");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let other =
            JwtValidator::new("another-secret-of-sufficient-length-1".into(), 3600).unwrap();
        let token = other.generate_token("city-admin", "admin").unwrap();

        assert!(matches!(
            validator().verify_token(&token),
            Err(PortalError::Unauthorized(_))
        ));
        assert!(validator().verify_token("not.a.jwt").is_err());
    }

    #[test]
    fn test_expired_token() {
        let jwt = validator();
        let claims = Claims {
            username: "city-admin".into(),
            role: "admin".into(),
            iss: ISSUER.into(),
            iat: 1_600_000_000,
            exp: 1_600_000_060,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &jwt.encoding).unwrap();

        match jwt.verify_token(&token) {
            Err(PortalError::Unauthorized(reason)) => assert_eq!(reason, "Session expired"),
            other => panic!("expected expiry, got {:?}", other),
        }
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_secret_and_expiry_checks() {
        assert!(JwtValidator::new("short".into(), 3600).is_err());
        assert!(JwtValidator::new(SECRET.into(), 0).is_err());
        assert!(JwtValidator::new(SECRET.into(), 60).is_ok());
    }
}
