use serde::{Deserialize, Serialize};

use crate::model::common::{LoginCode, VoterId};

/// Administrator sign-in credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Voter sign-in: just the code they were sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterLogin {
    pub code: LoginCode,
}

/// A self-registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub email: VoterId,
    pub name: String,
}
