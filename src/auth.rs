//! Bearer tokens and the single configured account.
//!
//! A token is `base64url(claims json) "." hex(hmac-sha256(secret, payload))`.

use std::sync::Arc;

use axum::extract::{ FromRef, FromRequestParts };
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{ Duration, Utc };
use hmac::{ Hmac, Mac };
use log::debug;
use serde::{ Deserialize, Serialize };
use sha2::{ Digest, Sha256 };

use crate::error::ChatError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self { secret: secret.as_bytes().to_vec(), ttl: Duration::hours(ttl_hours) }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, ChatError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e|
            ChatError::Auth(format!("signing key rejected: {}", e))
        )?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, user: &str) -> Result<String, ChatError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    pub fn issue_at(&self, user: &str, now: i64) -> Result<String, ChatError> {
        let claims = Claims {
            sub: user.to_string(),
            iat: now,
            exp: now + self.ttl.num_seconds(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ChatError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, ChatError> {
        let invalid = || ChatError::Auth("invalid token".to_string());

        let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
        let signature = hex::decode(signature).map_err(|_| invalid())?;
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;

        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| invalid())?;
        if claims.exp <= now {
            return Err(ChatError::Auth("token expired".to_string()));
        }
        Ok(claims)
    }
}

pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub struct Credentials {
    user: String,
    password_sha256: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password_sha256: impl Into<String>) -> Self {
        Self { user: user.into(), password_sha256: password_sha256.into().to_ascii_lowercase() }
    }

    pub fn check(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(username, &self.user);
        let password_ok = constant_time_eq(&password_digest(password), &self.password_sha256);
        user_ok & password_ok
    }
}

/// Compares two strings without short-circuiting on the first differing
/// byte: both are MACed under one key and the tags checked with
/// `verify_slice`.
fn constant_time_eq(a: &str, b: &str) -> bool {
    const KEY: &[u8] = b"ambro-chat credentials";
    let (Ok(mut expected), Ok(mut supplied)) = (
        HmacSha256::new_from_slice(KEY),
        HmacSha256::new_from_slice(KEY),
    ) else {
        return false;
    };
    expected.update(b.as_bytes());
    supplied.update(a.as_bytes());
    supplied.verify_slice(&expected.finalize().into_bytes()).is_ok()
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The authenticated user of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser where Arc<TokenSigner>: FromRef<S>, S: Send + Sync {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(||
            ChatError::Auth("missing bearer token".to_string())
        )?;
        let signer = Arc::<TokenSigner>::from_ref(state);
        let claims = signer.verify(token)?;
        debug!("Authenticated request for {}", claims.sub);
        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issued_token_verifies() {
        let signer = TokenSigner::new(SECRET, 24);
        let token = signer.issue_at("ana", 1_000).unwrap();
        let claims = signer.verify_at(&token, 1_001).unwrap();
        assert_eq!(claims.sub, "ana");
        assert_eq!(claims.exp, 1_000 + 24 * 3600);
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = TokenSigner::new(SECRET, 1);
        let token = signer.issue_at("ana", 0).unwrap();
        let err = signer.verify_at(&token, 3600).unwrap_err();
        assert!(matches!(err, ChatError::Auth(ref m) if m.contains("expired")));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let signer = TokenSigner::new(SECRET, 24);
        let token = signer.issue_at("ana", 0).unwrap();
        let (_, sig) = token.split_once('.').unwrap();

        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"root","iat":0,"exp":99999999999}"#);
        let forged = format!("{}.{}", forged_payload, sig);
        assert!(signer.verify_at(&forged, 1).is_err());

        let other = TokenSigner::new("another-secret-another-secret-xx", 24);
        assert!(other.verify_at(&token, 1).is_err());

        for junk in ["", "abc", "a.b", "..."] {
            assert!(signer.verify_at(junk, 1).is_err());
        }
    }

    #[test]
    fn credentials_check_password_digest() {
        let creds = Credentials::new("admin", password_digest("senha"));
        assert!(creds.check("admin", "senha"));
        assert!(!creds.check("admin", "Senha"));
        assert!(!creds.check("outro", "senha"));
        assert!(!creds.check("admi", "senha"));
        assert!(!creds.check("", ""));

        let upper = Credentials::new("admin", password_digest("senha").to_ascii_uppercase());
        assert!(upper.check("admin", "senha"));
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
