//! Credential kinds and the authenticated identity record.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::codec::ejson;

/// Credentials accepted by [`Client::login`](crate::Client::login).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    /// Username (or e-mail address) and password.
    Password { username: String, password: String },
    /// LDAP-backed username and password.
    Ldap { username: String, password: String },
    /// OAuth credential token pair.
    OAuth {
        credential_token: String,
        credential_secret: String,
    },
    /// Resume token from an earlier login.
    Resume { token: String },
}

impl Credentials {
    /// Username/password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Resume-token credentials.
    pub fn resume(token: impl Into<String>) -> Self {
        Self::Resume { token: token.into() }
    }

    /// Build the login method parameter for this credential kind.
    ///
    /// Passwords travel as SHA-256 digests, never as plaintext.
    pub(crate) fn to_params(&self) -> Value {
        match self {
            Self::Password { username, password } => json!({
                "user": user_selector(username),
                "password": { "digest": sha256_hex(password), "algorithm": "sha-256" },
            }),
            Self::Ldap { username, password } => json!({
                "ldap": true,
                "username": username,
                "ldapPass": password,
                "ldapOptions": {},
            }),
            Self::OAuth {
                credential_token,
                credential_secret,
            } => json!({
                "oauth": {
                    "credentialToken": credential_token,
                    "credentialSecret": credential_secret,
                },
            }),
            Self::Resume { token } => json!({ "resume": token }),
        }
    }
}

fn user_selector(username: &str) -> Value {
    if username.contains('@') {
        json!({ "email": username })
    } else {
        json!({ "username": username })
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Identity returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    /// Server-side account identifier.
    pub id: String,
    /// Resume token for re-authenticating without a password.
    pub token: String,
    /// Expiry of the resume token, when the server reports one.
    pub token_expires: Option<DateTime<Utc>>,
}

impl UserInfo {
    /// Parse a login method result.
    pub(crate) fn from_login_result(value: &Value) -> Option<Self> {
        Some(Self {
            id: value.get("id")?.as_str()?.to_string(),
            token: value.get("token")?.as_str()?.to_string(),
            token_expires: value.get("tokenExpires").and_then(ejson::as_date),
        })
    }
}
