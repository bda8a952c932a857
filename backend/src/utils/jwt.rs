use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub token_type: String,
    pub exp: i64,    // expiration time
    pub iat: i64,    // issued at
    pub jti: String, // JWT ID
}

impl Claims {
    pub fn new(
        user_id: String,
        username: String,
        email: Option<String>,
        expiration_hours: u64,
    ) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(expiration_hours as i64);

        Self {
            sub: user_id,
            username,
            email,
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }
}

/// Tokens are issued by the account service; this is used by tests and
/// local tooling that need a valid bearer.
pub fn create_access_token(
    user_id: String,
    username: String,
    email: Option<String>,
    secret: &str,
    expiration_hours: u64,
) -> anyhow::Result<String> {
    let claims = Claims::new(user_id, username, email, expiration_hours);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

/// Verifies signature and expiry and rejects refresh or other token types.
pub fn verify_access_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    if token_data.claims.token_type != ACCESS_TOKEN_TYPE {
        anyhow::bail!("unexpected token type: {}", token_data.claims.token_type);
    }
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_verify_access_token() {
        let token = create_access_token(
            "user-123".into(),
            "bob".into(),
            Some("bob@example.com".into()),
            "secret",
            1,
        )
        .expect("create token");
        let claims = verify_access_token(&token, "secret").expect("verify token");
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.username, "bob");
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn refresh_tokens_are_not_accepted_as_access_tokens() {
        let mut claims = Claims::new("user-123".into(), "bob".into(), None, 1);
        claims.token_type = "refresh".into();
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("secret".as_ref()),
        )
        .expect("encode");

        assert!(verify_access_token(&token, "secret").is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token =
            create_access_token("user-123".into(), "bob".into(), None, "secret", 1).expect("token");
        assert!(verify_access_token(&token, "other").is_err());
    }
}
