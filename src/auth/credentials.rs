use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Login and password pair.
///
/// The password is wiped from memory when the value is dropped and never
/// shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    login: String,
    password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Parses a `basic_auth` header value of the form `login:password`.
    ///
    /// Both parts must be non-empty and the value must contain exactly one
    /// separator.
    pub fn from_basic(value: &str) -> Option<Self> {
        let mut parts = value.split(':');
        let login = parts.next()?;
        let password = parts.next()?;
        if parts.next().is_some() || login.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self::new(login, password))
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn verify(&self, expected_password: &str) -> bool {
        self.password == expected_password
    }

    /// `login:password`, wiped when the returned value is dropped.
    pub fn to_basic(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}:{}", self.login, self.password))
    }

    /// Scrubs the password and keeps only the identity.
    pub fn into_login(mut self) -> String {
        self.password.zeroize();
        std::mem::take(&mut self.login)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}
