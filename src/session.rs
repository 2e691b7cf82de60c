use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::hash::hash;
use crate::error::{Error, Result};

const AUTH_ROUNDS: u32 = 1;
const ENCRYPTION_ROUNDS: u32 = 2;
const INTEGRITY_ROUNDS: u32 = 3;

/// Logged-in identity. The master key lives in memory only.
#[derive(Default)]
pub struct Session {
    username: Option<String>,
    master_key: Option<Zeroizing<String>>,
}

/// Identity as sent to the server: the username and the derived auth key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A saved copy of the session fields, used to undo tentative mutations.
pub struct SessionSnapshot {
    username: Option<String>,
    master_key: Option<Zeroizing<String>>,
}

impl Session {
    pub fn new(username: impl Into<String>, master_key: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            master_key: Some(Zeroizing::new(master_key.into())),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn master_key(&self) -> Option<&str> {
        self.master_key.as_deref().map(String::as_str)
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.username = username;
    }

    pub fn set_master_key(&mut self, master_key: Option<String>) {
        self.master_key = master_key.map(Zeroizing::new);
    }

    pub fn set(&mut self, username: impl Into<String>, master_key: impl Into<String>) {
        self.username = Some(username.into());
        self.master_key = Some(Zeroizing::new(master_key.into()));
    }

    pub fn clear(&mut self) {
        self.username = None;
        self.master_key = None;
    }

    pub fn is_logged_in(&self) -> bool {
        self.username().is_some_and(|u| !u.is_empty())
            && self.master_key().is_some_and(|k| !k.is_empty())
    }

    /// Whether the session identifies `username`.
    pub fn is(&self, username: Option<&str>) -> bool {
        username.is_some() && self.username() == username
    }

    pub fn auth_key(&self) -> Result<String> {
        self.derive(AUTH_ROUNDS)
    }

    pub fn encryption_key(&self) -> Result<String> {
        self.derive(ENCRYPTION_ROUNDS)
    }

    pub fn integrity_key(&self) -> Result<String> {
        self.derive(INTEGRITY_ROUNDS)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            username: self.username.clone().unwrap_or_default(),
            password: self.auth_key()?,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            username: self.username.clone(),
            master_key: self.master_key.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.username = snapshot.username;
        self.master_key = snapshot.master_key;
    }

    fn derive(&self, rounds: u32) -> Result<String> {
        match self.master_key() {
            Some(key) if !key.is_empty() => Ok(hash(key, rounds)),
            _ => Err(Error::NotAuthenticated),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
