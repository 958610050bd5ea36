use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Claims;

/// Bearer token validation. Tokens are issued by an external identity
/// provider sharing the HS256 secret.
pub struct AuthService;

impl AuthService {
    /// Validate JWT token against the current secret, then previous ones
    pub fn validate_token(token: &str, config: &Config) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let keys = std::iter::once(config.jwt.secret.as_str())
            .chain(config.jwt.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(token_data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Ok(token_data.claims);
            }
        }

        Err(AppError::Unauthorized("Invalid token".to_string()))
    }

    #[cfg(test)]
    pub fn issue_token(user_id: &str, role: &str, secret: &str, ttl_seconds: i64) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: (now + ttl_seconds) as usize,
            iat: now as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}
