use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::common::{CandidateId, PositionId};

pub const DEFAULT_BIO: &str = "A newly added candidate. Please update their biography.";
pub const DEFAULT_PLATFORM: &str = "The platform for this candidate has not been set yet.";

/// Candidate profile data. Everything an administrator may edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    /// The position this candidate stands for.
    pub position: PositionId,
    pub bio: String,
    pub platform: String,
    pub image_url: String,
}

impl CandidateCore {
    /// Create a profile with placeholder biography, platform, and portrait.
    pub fn new(name: impl Into<String>, position: PositionId) -> Self {
        let name = name.into();
        let image_url = placeholder_image(&name);
        Self {
            name,
            position,
            bio: DEFAULT_BIO.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            image_url,
        }
    }

    /// Whether the portrait is still the generated initials placeholder.
    pub fn has_placeholder_image(&self) -> bool {
        self.image_url == placeholder_image(&self.name)
    }
}

/// A placeholder portrait showing the candidate's initials.
pub fn placeholder_image(name: &str) -> String {
    let initials = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect::<String>();
    let initials = if initials.is_empty() {
        "?".to_string()
    } else {
        initials
    };
    format!("https://placehold.co/400x400/1e3a8a/ffffff?text={initials}")
}

/// A candidate without an ID or tally.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID and vote tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    #[serde(flatten)]
    pub candidate: CandidateCore,
    /// Only ever written by committing ballots.
    pub votes: u64,
}

impl Candidate {
    pub fn new(id: CandidateId, candidate: CandidateCore) -> Self {
        Self {
            id,
            candidate,
            votes: 0,
        }
    }
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_candidates_get_placeholders() {
        let position = PositionId::from_title("President").unwrap();
        let candidate = CandidateCore::new("ada lovelace", position);
        assert_eq!(candidate.bio, DEFAULT_BIO);
        assert_eq!(candidate.platform, DEFAULT_PLATFORM);
        assert!(candidate.image_url.ends_with("text=AL"));
    }
}
