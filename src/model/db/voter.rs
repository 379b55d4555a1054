use serde::{Deserialize, Serialize};

use crate::model::common::{LoginCode, VoterId, VoterStatus};

/// A registered voter, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    /// Voter unique ID: their normalised email address.
    #[serde(rename = "_id")]
    pub id: VoterId,
    pub name: String,
    pub status: VoterStatus,
    /// The code the voter signs in with. Unique across all voters.
    pub login_code: LoginCode,
}

impl Voter {
    /// Create a new eligible voter with a fresh login code.
    pub fn new(id: VoterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: VoterStatus::Eligible,
            login_code: LoginCode::random(),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Voter {
        pub fn example() -> Self {
            Self::new("alice@uni.edu".parse().unwrap(), "Alice Example")
        }

        pub fn example2() -> Self {
            Self::new("bob@uni.edu".parse().unwrap(), "Bob Example")
        }
    }
}
