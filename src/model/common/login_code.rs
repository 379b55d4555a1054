use std::fmt::Display;
use std::str::FromStr;

use mongodb::bson::Bson;
use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PREFIX: &str = "VOTE";
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const RANDOM_LENGTH: usize = 6;

/// A voter's one-time login code, e.g. `VOTEX7K2QA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoginCode(String);

impl LoginCode {
    /// Generate a random code.
    pub fn random() -> Self {
        let dist = Uniform::from(0..CHARSET.len());
        let mut rng = rand::thread_rng();
        let suffix = (0..RANDOM_LENGTH)
            .map(|_| CHARSET[dist.sample(&mut rng)] as char)
            .collect::<String>();
        Self(format!("{PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LoginCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginCodeError {
    #[error("login code must start with VOTE")]
    MissingPrefix,
    #[error("login code must be VOTE followed by 6 characters, got {0}")]
    InvalidLength(usize),
    #[error("login code must only contain letters and digits, found '{0}'")]
    InvalidChar(char),
}

impl FromStr for LoginCode {
    type Err = LoginCodeError;

    /// Codes are matched case-insensitively and ignoring surrounding whitespace,
    /// since voters type them by hand.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        let suffix = code
            .strip_prefix(PREFIX)
            .ok_or(LoginCodeError::MissingPrefix)?;
        if suffix.chars().count() != RANDOM_LENGTH {
            return Err(LoginCodeError::InvalidLength(suffix.chars().count()));
        }
        if let Some(c) = suffix.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(LoginCodeError::InvalidChar(c));
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for LoginCode {
    type Error = LoginCodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LoginCode> for String {
    fn from(code: LoginCode) -> Self {
        code.0
    }
}

impl From<LoginCode> for Bson {
    fn from(code: LoginCode) -> Self {
        Bson::String(code.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_parse() {
        for _ in 0..100 {
            let code = LoginCode::random();
            assert_eq!(code.as_str().len(), PREFIX.len() + RANDOM_LENGTH);
            assert_eq!(code.as_str().parse::<LoginCode>(), Ok(code));
        }
    }

    #[test]
    fn parsing_is_forgiving_about_case_and_whitespace() {
        let code: LoginCode = " votea1b2c3\n".parse().unwrap();
        assert_eq!(code.as_str(), "VOTEA1B2C3");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert_eq!("A1B2C3".parse::<LoginCode>(), Err(LoginCodeError::MissingPrefix));
        assert_eq!("VOTEA1B2".parse::<LoginCode>(), Err(LoginCodeError::InvalidLength(4)));
        assert_eq!("VOTEA1B2C!".parse::<LoginCode>(), Err(LoginCodeError::InvalidChar('!')));
    }
}
