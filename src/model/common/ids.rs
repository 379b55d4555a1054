use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use mongodb::bson::Bson;
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A voter's unique identity: their email address, trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoterId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoterIdError {
    #[error("Voter ID must be an email address, got '{0}'")]
    NotAnEmail(String),
}

impl VoterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for VoterId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VoterId {
    type Err = VoterIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let email = s.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && domain.contains('.')
                    && !domain.contains('@')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if valid {
            Ok(Self(email))
        } else {
            Err(VoterIdError::NotAnEmail(s.to_string()))
        }
    }
}

impl TryFrom<String> for VoterId {
    type Error = VoterIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VoterId> for String {
    fn from(id: VoterId) -> Self {
        id.0
    }
}

impl From<VoterId> for Bson {
    fn from(id: VoterId) -> Self {
        Bson::String(id.0)
    }
}

impl<'a> FromParam<'a> for VoterId {
    type Error = VoterIdError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

impl UriDisplay<Path> for VoterId {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> fmt::Result {
        formatter.write_value(&self.0)
    }
}

impl_from_uri_param_identity!([Path] VoterId);

/// A position's unique identity, derived from its title when first created.
/// It never changes afterwards, even if the title is edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Position title must contain at least one word")]
pub struct EmptyTitle;

impl PositionId {
    /// Derive an ID from a title, e.g. "Student Body President" becomes
    /// "student-body-president".
    pub fn from_title(title: &str) -> Result<Self, EmptyTitle> {
        let slug = title
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            Err(EmptyTitle)
        } else {
            Ok(Self(slug))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PositionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PositionId> for Bson {
    fn from(id: PositionId) -> Self {
        Bson::String(id.0)
    }
}

impl<'a> FromParam<'a> for PositionId {
    type Error = std::convert::Infallible;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        Ok(Self(param.to_string()))
    }
}

impl UriDisplay<Path> for PositionId {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> fmt::Result {
        formatter.write_value(&self.0)
    }
}

impl_from_uri_param_identity!([Path] PositionId);

/// A candidate's unique identity. Assigned in increasing order as candidates are created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CandidateId(pub u32);

impl Display for CandidateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CandidateId> for Bson {
    fn from(id: CandidateId) -> Self {
        Bson::Int64(id.0.into())
    }
}

impl<'a> FromParam<'a> for CandidateId {
    type Error = std::num::ParseIntError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse().map(Self)
    }
}

impl UriDisplay<Path> for CandidateId {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> fmt::Result {
        formatter.write_value(self.0)
    }
}

impl_from_uri_param_identity!([Path] CandidateId);
