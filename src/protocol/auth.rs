//! RTSP authentication: HTTP-style Digest (RFC 2617, MD5) and Basic.
//!
//! Created once per server when credentials are configured; the digest
//! nonce is generated at construction and stays fixed for the server's
//! lifetime. Both schemes implement the same challenge/verify capability —
//! the dialog engine doesn't care which is active.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rand::Rng;

/// A username/password pair the server accepts.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Result of checking a request's `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    /// Credentials are valid; proceed with the request.
    Granted,
    /// No `Authorization` header; challenge and keep the connection open.
    Missing,
    /// Credentials were supplied but are wrong; challenge and tear the
    /// connection down.
    Rejected,
}

/// Challenge/verify capability, one variant per supported scheme.
#[derive(Debug, Clone)]
pub enum Authenticator {
    Basic {
        credential: Credential,
        realm: String,
    },
    Digest {
        credential: Credential,
        realm: String,
        nonce: String,
    },
}

impl Authenticator {
    /// Digest authenticator with a fresh server nonce (9-digit decimal).
    pub fn digest(credential: Credential, realm: &str) -> Self {
        let nonce = rand::rng().random_range(100_000_000u32..1_000_000_000).to_string();
        Self::Digest {
            credential,
            realm: realm.to_string(),
            nonce,
        }
    }

    pub fn basic(credential: Credential, realm: &str) -> Self {
        Self::Basic {
            credential,
            realm: realm.to_string(),
        }
    }

    /// The `WWW-Authenticate` header value sent with 401 responses.
    pub fn challenge(&self) -> String {
        match self {
            Self::Basic { realm, .. } => format!("Basic realm=\"{realm}\""),
            Self::Digest { realm, nonce, .. } => {
                format!("Digest realm=\"{realm}\", nonce=\"{nonce}\", algorithm=MD5")
            }
        }
    }

    /// Check a request's `Authorization` header against the configured
    /// credential.
    pub fn check(&self, method: &str, authorization: Option<&str>) -> AuthCheck {
        let Some(header) = authorization else {
            return AuthCheck::Missing;
        };
        let granted = match self {
            Self::Basic { credential, .. } => check_basic(credential, header),
            Self::Digest {
                credential,
                realm,
                nonce,
            } => check_digest(credential, realm, nonce, method, header),
        };
        if granted {
            AuthCheck::Granted
        } else {
            tracing::warn!(method, "authorization header rejected");
            AuthCheck::Rejected
        }
    }
}

fn check_basic(credential: &Credential, header: &str) -> bool {
    let Some(encoded) = header.trim().strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    match text.split_once(':') {
        Some((user, pass)) => user == credential.username && pass == credential.password,
        None => false,
    }
}

fn check_digest(
    credential: &Credential,
    realm: &str,
    nonce: &str,
    method: &str,
    header: &str,
) -> bool {
    let Some(fields) = header.trim().strip_prefix("Digest ") else {
        return false;
    };

    let mut username = None;
    let mut header_realm = None;
    let mut header_nonce = None;
    let mut uri = None;
    let mut response = None;

    for field in fields.split(',') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "username" => username = Some(value),
            "realm" => header_realm = Some(value),
            "nonce" => header_nonce = Some(value),
            "uri" => uri = Some(value),
            "response" => response = Some(value),
            _ => {}
        }
    }

    let (Some(username), Some(header_realm), Some(header_nonce), Some(uri), Some(response)) =
        (username, header_realm, header_nonce, uri, response)
    else {
        return false;
    };

    username == credential.username
        && header_realm == realm
        && header_nonce == nonce
        && response == digest_response(&credential.username, &credential.password, realm, nonce, method, uri)
}

/// Compute the RFC 2617 digest response hash:
/// `MD5(MD5(user:realm:pass):nonce:MD5(method:uri))`, lowercase hex.
pub fn digest_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}
