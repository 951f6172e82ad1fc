//! Bearer credentials for API calls
//!
//! Session management lives outside this crate. The engine only needs the
//! current access token, read fresh for every request so a token refreshed
//! by the session layer is picked up without restarting.

use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Session filename in the AgroMarket config directory
pub const SESSION_FILE: &str = "session.json";

/// Source of the bearer token attached to API calls
pub trait CredentialProvider: Send + Sync {
    /// Current access token, or None when signed out
    fn bearer_token(&self) -> Option<String>;
}

/// No credentials; requests are sent anonymously
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A fixed token
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Deserialize)]
struct SessionFile {
    access_token: Option<String>,
}

/// Token read from the session file written by the sign-in flow
pub struct SessionFileCredentials {
    path: PathBuf,
}

impl SessionFileCredentials {
    /// Session file at an explicit path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Session file in the default config directory, if it can be located
    pub fn default_location() -> Option<Self> {
        config::config_path(SESSION_FILE).map(Self::new)
    }
}

impl CredentialProvider for SessionFileCredentials {
    fn bearer_token(&self) -> Option<String> {
        match config::load_json_file::<SessionFile>(&self.path) {
            Ok(session) => session.access_token.filter(|t| !t.is_empty()),
            Err(e) => {
                debug!("No session token available: {:#}", e);
                None
            }
        }
    }
}
