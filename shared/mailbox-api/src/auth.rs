//! Access token resolution
//!
//! Obtaining a token (OAuth consent, refresh) is left to external tooling.
//! This module only turns an explicit token or a stored `token.json` into a
//! bearer token that [`crate::gmail::GmailClient`] can use.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{MailboxError, MailboxResult};

/// Bearer token for the mailbox API. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token
    ///
    /// # Errors
    ///
    /// Returns `MailboxError::Credentials` if the token is blank
    pub fn new(token: impl Into<String>) -> MailboxResult<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(MailboxError::Credentials(
                "access token is empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Returns the raw token for the `Authorization` header
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Stored token in the layout written by Google's OAuth client libraries
#[derive(Debug, Deserialize)]
struct StoredToken {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

/// Where the access token comes from
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Token supplied directly (flag or environment variable)
    AccessToken(String),
    /// Path to a `token.json` file
    TokenFile(PathBuf),
}

impl Credentials {
    /// Resolves the credentials into a usable bearer token
    ///
    /// # Errors
    ///
    /// Returns `MailboxError::Credentials` if the token is empty, expired,
    /// not a bearer token, or the token file cannot be read or parsed
    pub fn resolve(&self) -> MailboxResult<AccessToken> {
        self.resolve_at(Utc::now())
    }

    fn resolve_at(&self, now: DateTime<Utc>) -> MailboxResult<AccessToken> {
        match self {
            Self::AccessToken(token) => AccessToken::new(token.as_str()),
            Self::TokenFile(path) => read_token_file(path, now),
        }
    }
}

fn read_token_file(path: &Path, now: DateTime<Utc>) -> MailboxResult<AccessToken> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        MailboxError::Credentials(format!("cannot read {}: {e}", path.display()))
    })?;
    let stored: StoredToken = serde_json::from_str(&contents).map_err(|e| {
        MailboxError::Credentials(format!("cannot parse {}: {e}", path.display()))
    })?;

    if let Some(token_type) = stored.token_type.as_deref() {
        if !token_type.is_empty() && !token_type.eq_ignore_ascii_case("bearer") {
            return Err(MailboxError::Credentials(format!(
                "unsupported token type '{token_type}'"
            )));
        }
    }

    // Tokens that never expire carry the zero timestamp (year 1)
    if let Some(expiry) = stored.expiry.filter(|expiry| expiry.year() > 1) {
        if expiry <= now {
            return Err(MailboxError::Credentials(format!(
                "token in {} expired at {expiry}",
                path.display()
            )));
        }
    }

    debug!(path = %path.display(), "Loaded access token from file");
    AccessToken::new(stored.access_token)
}
