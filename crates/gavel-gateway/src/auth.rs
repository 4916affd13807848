//! Bearer-token verification: HS256 only, issuer and audience enforced.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use gavel_core::error::GavelError;
use gavel_core::types::UserId;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: UserId,
    pub admin: bool,
}

#[derive(Clone)]
pub struct AuthVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl AuthVerifier {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        // Validation::new pins the accepted algorithm set to exactly HS256;
        // a token signed with anything else fails before claims are read.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthedUser, GavelError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| GavelError::Auth(e.to_string()))?;
        let user_id: UserId = data
            .claims
            .sub
            .parse()
            .map_err(|_| GavelError::Auth("subject is not a user id".into()))?;
        Ok(AuthedUser {
            user_id,
            admin: data.claims.role.as_deref() == Some("admin"),
        })
    }

    pub fn verify_admin(&self, token: &str) -> Result<AuthedUser, GavelError> {
        let user = self.verify(token)?;
        if !user.admin {
            return Err(GavelError::Forbidden);
        }
        Ok(user)
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "0123456789abcdef0123456789abcdefXY";
    const ISSUER: &str = "gavel";
    const AUDIENCE: &str = "gavel-clients";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        iss: &'a str,
        aud: &'a str,
        role: Option<&'a str>,
        exp: usize,
    }

    fn token(alg: Algorithm, iss: &str, aud: &str, role: Option<&str>) -> String {
        let claims = TestClaims {
            sub: "a1b2c3d4-0000-0000-0000-000000000000",
            iss,
            aud,
            role,
            exp: 4_000_000_000,
        };
        encode(&Header::new(alg), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn verifier() -> AuthVerifier {
        AuthVerifier::new(SECRET, ISSUER, AUDIENCE)
    }

    #[test]
    fn valid_token_verifies() {
        let user = verifier().verify(&token(Algorithm::HS256, ISSUER, AUDIENCE, None)).unwrap();
        assert_eq!(user.user_id.to_string(), "a1b2c3d4-0000-0000-0000-000000000000");
        assert!(!user.admin);
    }

    #[test]
    fn wrong_issuer_rejected() {
        assert!(verifier().verify(&token(Algorithm::HS256, "other", AUDIENCE, None)).is_err());
    }

    #[test]
    fn wrong_audience_rejected() {
        assert!(verifier().verify(&token(Algorithm::HS256, ISSUER, "other", None)).is_err());
    }

    #[test]
    fn non_hs256_rejected() {
        assert!(verifier().verify(&token(Algorithm::HS384, ISSUER, AUDIENCE, None)).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(verifier().verify("not.a.token").is_err());
    }

    #[test]
    fn admin_role_enforced() {
        let v = verifier();
        assert!(v.verify_admin(&token(Algorithm::HS256, ISSUER, AUDIENCE, None)).is_err());
        let user = v.verify_admin(&token(Algorithm::HS256, ISSUER, AUDIENCE, Some("admin"))).unwrap();
        assert!(user.admin);
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
