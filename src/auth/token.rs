use crate::error::AuthError;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, decode, Header, EncodingKey, DecodingKey, Validation, Algorithm};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::handshake::server::Request;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

/// Resolves the authenticated user of a websocket upgrade request.
///
/// Accepts `Authorization: Bearer <token>` or a `token` query parameter,
/// since browsers cannot set headers on a websocket handshake.
pub struct Authenticator {
    jwt_secret: String,
    token_expiry_hours: i64,
}

impl Authenticator {
    pub fn new(jwt_secret: String, token_expiry_hours: i64) -> Self {
        Self {
            jwt_secret,
            token_expiry_hours,
        }
    }

    pub fn authenticate_request(&self, req: &Request) -> Result<String, AuthError> {
        let token = bearer_token(req)
            .or_else(|| query_token(req))
            .ok_or(AuthError::MissingCredentials)?;

        let claims = self.validate_token(&token)?;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims.sub)
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = (now + Duration::hours(self.token_expiry_hours)).timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(claims.claims)
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn query_token(req: &Request) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn authenticator() -> Authenticator {
        Authenticator::new("test_secret".to_string(), 1)
    }

    fn request(uri: &str, auth_header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth_header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_bearer_header_resolves_user() {
        let auth = authenticator();
        let token = auth.issue_token("alice").unwrap();
        let req = request("/ws", Some(&format!("Bearer {}", token)));
        assert_eq!(assert_ok!(auth.authenticate_request(&req)), "alice");
    }

    #[test]
    fn test_query_token_resolves_user() {
        let auth = authenticator();
        let token = auth.issue_token("bob").unwrap();
        let req = request(&format!("/ws?room=x&token={}", token), None);
        assert_eq!(auth.authenticate_request(&req).unwrap(), "bob");
    }

    #[test]
    fn test_missing_credentials() {
        let auth = authenticator();
        let req = request("/ws", None);
        assert!(matches!(
            auth.authenticate_request(&req),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let other = Authenticator::new("other_secret".to_string(), 1);
        let token = other.issue_token("mallory").unwrap();
        let req = request("/ws", Some(&format!("Bearer {}", token)));
        assert!(matches!(
            authenticator().authenticate_request(&req),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // Well past the default validation leeway.
        let auth = Authenticator::new("test_secret".to_string(), -2);
        let token = auth.issue_token("carol").unwrap();
        let err = assert_err!(auth.validate_token(&token));
        assert!(matches!(err, AuthError::TokenExpired));
    }
}
