use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// JWT claims carried by the bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Email
    pub uid: i64,    // User ID
    pub exp: usize,  // Expiration timestamp
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Password hash error: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Sign a new token for a user.
pub fn sign(user_id: i64, email: &str, secret: &str, lifetime_hours: i64) -> Result<String, AppError> {
    let expiration = Utc::now() + Duration::hours(lifetime_hours);

    let claims = Claims {
        sub: email.to_owned(),
        uid: user_id,
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("JWT sign error: {}", e)))
}

/// Verify and decode a token.
pub fn verify(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::TokenInvalid)?;
    Ok(token_data.claims)
}

/// Authenticated user extracted from the `Authorization: Bearer <token>`
/// header. Add this as a handler parameter to require authentication.
#[derive(Debug)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
}

fn auth_from_request(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let config = req
        .app_data::<web::Data<AppConfig>>()
        .ok_or_else(|| AppError::Internal("AppConfig missing from app data".into()))?;

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::TokenMissing)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::TokenInvalid)?;

    let claims = verify(token, &config.jwt_secret)?;

    Ok(AuthUser {
        user_id: claims.uid,
        email: claims.sub,
    })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(auth_from_request(req))
    }
}
