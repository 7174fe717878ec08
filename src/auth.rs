use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::ApiError;
use crate::models::Role;

/// Resolved caller identity. The session-issuing collaborator puts these
/// fields into the token; this crate only decodes and trusts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Blogger)
    }

    /// Reject unless the caller's role is in `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    /// Row-level ownership check: permit the owner themselves, or any caller
    /// whose role is in `allowed`.
    pub fn require_owner_or_role(
        &self,
        owner_id: Option<&str>,
        allowed: &[Role],
    ) -> Result<(), ApiError> {
        if owner_id == Some(self.id.as_str()) || allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding the validated caller identity. Use `Option<Auth>` on
/// routes where anonymous access is allowed.
pub struct Auth(pub Identity);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            match decode_jwt(bearer.token()) {
                Ok(claims) => {
                    return ready(Ok(Auth(Identity {
                        id: claims.sub,
                        name: claims.name,
                        email: claims.email,
                        role: claims.role,
                    })))
                }
                Err(_) => return ready(Err(ApiError::Unauthorized.into())),
            }
        }
        ready(Err(ApiError::Unauthorized.into()))
    }
}

/// Issue a JWT for a user. Used by tests and by the session collaborator.
pub fn create_token(
    user_id: &str,
    name: &str,
    email: &str,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(id: &str, role: Role) -> Identity {
        Identity {
            id: id.into(),
            name: "t".into(),
            email: "t@example.com".into(),
            role,
        }
    }

    #[test]
    fn role_guard_accepts_listed_roles() {
        let admin = ident("1", Role::Admin);
        assert!(admin.require_role(&[Role::Admin]).is_ok());
        assert!(admin.require_role(&[Role::Blogger]).is_err());
    }

    #[test]
    fn owner_check_permits_owner_and_elevated_roles() {
        let blogger = ident("b1", Role::Blogger);
        assert!(blogger.require_owner_or_role(Some("b1"), &[Role::Admin]).is_ok());
        assert!(blogger.require_owner_or_role(Some("b2"), &[Role::Admin]).is_err());
        let admin = ident("a1", Role::Admin);
        assert!(admin.require_owner_or_role(Some("b2"), &[Role::Admin]).is_ok());
    }

    #[test]
    fn missing_owner_is_not_a_match() {
        let user = ident("u1", Role::User);
        assert!(user.require_owner_or_role(None, &[Role::Admin]).is_err());
    }
}
