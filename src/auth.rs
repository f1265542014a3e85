use anyhow::{anyhow, Context};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

/// Verifies Supabase access tokens. Supabase signs user JWTs with a shared
/// HS256 secret and an `authenticated` audience.
#[derive(Clone)]
pub struct AuthService {
    decoding_key: Option<DecodingKey>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupabaseClaims {
    pub sub: String,
    pub email: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl AuthService {
    pub fn new(jwt_secret: Option<&str>) -> Self {
        let decoding_key = jwt_secret
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .map(|secret| DecodingKey::from_secret(secret.as_bytes()));
        Self { decoding_key }
    }

    pub fn verify_bearer_token(&self, authorization_header: &str) -> anyhow::Result<VerifiedUser> {
        let token = extract_bearer_token(authorization_header)?;
        self.verify_token(token)
    }

    pub fn verify_token(&self, token: &str) -> anyhow::Result<VerifiedUser> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| anyhow!("SUPABASE_JWT_SECRET is not configured."))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);

        let token_data = decode::<SupabaseClaims>(token, decoding_key, &validation)
            .context("JWT validation failed")?;

        let claims = token_data.claims;
        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("JWT sub is not a UUID: {}", claims.sub))?;

        Ok(VerifiedUser {
            user_id,
            email: claims.email,
        })
    }
}

pub fn extract_bearer_token(value: &str) -> anyhow::Result<&str> {
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();

    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(anyhow!("Invalid Authorization header format"));
    }

    Ok(token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: String,
        aud: String,
        exp: usize,
    }

    fn token_for(secret: &str, sub: &str, aud: &str) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            email: "user@example.com".to_string(),
            aud: aud.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let auth = AuthService::new(Some("test-secret"));
        let user_id = Uuid::new_v4();
        let token = token_for("test-secret", &user_id.to_string(), "authenticated");
        let verified = auth
            .verify_bearer_token(&format!("Bearer {token}"))
            .unwrap();
        assert_eq!(verified.user_id, user_id);
        assert_eq!(verified.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn rejects_wrong_secret_and_audience() {
        let auth = AuthService::new(Some("test-secret"));
        let user_id = Uuid::new_v4().to_string();

        let forged = token_for("other-secret", &user_id, "authenticated");
        assert!(auth.verify_token(&forged).is_err());

        let wrong_aud = token_for("test-secret", &user_id, "anon");
        assert!(auth.verify_token(&wrong_aud).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(extract_bearer_token("Token abc").is_err());
        assert!(extract_bearer_token("Bearer ").is_err());
        assert!(extract_bearer_token("abc").is_err());
    }
}
