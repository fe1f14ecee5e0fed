// Bearer-token authentication for the API.
//
// One shared credential pair issues short-lived HS256 tokens; every data
// endpoint requires a valid token. A missing or unreadable Authorization
// header is 401, a present but invalid/expired token is 403.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(
    username: &str,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(data.claims)
}

/// axum middleware guarding every data route.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|auth_header| auth_header.to_str().ok())
        .and_then(|auth_value| auth_value.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match verify_token(&token, &state.config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::FORBIDDEN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let token = issue_token("dashboard", "test-secret", 3600).unwrap();
        let claims = verify_token(&token, "test-secret").unwrap();

        assert_eq!(claims.sub, "dashboard");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token("dashboard", "test-secret", 3600).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Expired well beyond jsonwebtoken's default leeway.
        let token = issue_token("dashboard", "test-secret", -3600).unwrap();
        let err = verify_token(&token, "test-secret").unwrap_err();
        assert!(matches!(
            err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_token("not-a-jwt", "test-secret").is_err());
    }
}
