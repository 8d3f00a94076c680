pub mod jwt {
    use super::super::types::{AuthError, AuthResponse, Claims};
    use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now_secs() -> usize {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as usize)
            .unwrap_or_default()
    }

    pub fn generate_token(
        subject: String,
        role: Option<String>,
        expires_in: usize,
        secret: &str,
    ) -> Result<AuthResponse, AuthError> {
        let now = now_secs();
        let claims = Claims {
            sub: subject,
            exp: now + expires_in,
            iat: now,
            role,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok(AuthResponse { token, expires_in })
    }

    pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
        let validation = Validation::default();

        match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                &jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                _ => Err(AuthError::TokenVerification(e.to_string())),
            },
        }
    }
}

use super::types::{AuthError, SYSTEM_ROLE, SYSTEM_SUBJECT};

/// Mints the short-lived token the backend presents to the relay when it
/// logs in as the system actor. End-user tokens never carry this role.
#[derive(Clone)]
pub struct SystemCredentials {
    secret: String,
    ttl_secs: usize,
}

impl SystemCredentials {
    pub fn new(secret: impl Into<String>, ttl_secs: usize) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    pub fn mint(&self) -> Result<String, AuthError> {
        jwt::generate_token(
            SYSTEM_SUBJECT.to_string(),
            Some(SYSTEM_ROLE.to_string()),
            self.ttl_secs,
            &self.secret,
        )
        .map(|response| response.token)
    }
}

impl std::fmt::Debug for SystemCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCredentials")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_for_testing_only";

    mod jwt_tests {
        use super::*;

        #[test]
        fn test_generate_token() {
            let result = jwt::generate_token("42".to_string(), None, 3600, SECRET);
            assert!(result.is_ok(), "Token generation should succeed");

            let auth_response = result.unwrap();
            assert!(!auth_response.token.is_empty(), "Token should not be empty");
            assert_eq!(auth_response.expires_in, 3600, "Expiration should be 3600 seconds");
        }

        #[test]
        fn test_verify_token() {
            let auth_response = jwt::generate_token("42".to_string(), None, 3600, SECRET)
                .expect("Token generation should succeed");

            let claims = jwt::verify_token(&auth_response.token, SECRET).expect("Token should be valid");
            assert_eq!(claims.sub, "42");
            assert_eq!(claims.role, None);
        }

        #[test]
        fn test_verify_invalid_token() {
            let result = jwt::verify_token("invalid.token.here", SECRET);
            match result {
                Err(AuthError::TokenVerification(_)) => (),
                other => panic!("Expected TokenVerification error, got {:?}", other),
            }
        }

        #[test]
        fn test_verify_with_wrong_secret() {
            let auth_response = jwt::generate_token("42".to_string(), None, 3600, SECRET).unwrap();
            assert!(jwt::verify_token(&auth_response.token, "another_secret").is_err());
        }
    }

    mod system_credential_tests {
        use super::*;

        #[test]
        fn test_system_token_carries_system_role() {
            let creds = SystemCredentials::new(SECRET, 60);
            let token = creds.mint().expect("System token should mint");

            let claims = jwt::verify_token(&token, SECRET).unwrap();
            assert_eq!(claims.sub, SYSTEM_SUBJECT);
            assert_eq!(claims.role.as_deref(), Some(SYSTEM_ROLE));
            assert!(claims.exp <= claims.iat + 60);
        }

        #[test]
        fn test_debug_output_hides_secret() {
            let creds = SystemCredentials::new(SECRET, 60);
            assert!(!format!("{creds:?}").contains(SECRET));
        }
    }
}
