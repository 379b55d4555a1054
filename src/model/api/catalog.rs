use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateId, PositionId},
    db::{placeholder_image, Candidate, CandidateCore, Position},
};

/// A position to create or rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSpec {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDesc {
    pub id: PositionId,
    pub title: String,
}

impl From<Position> for PositionDesc {
    fn from(position: Position) -> Self {
        Self {
            id: position.id,
            title: position.title,
        }
    }
}

/// A candidate to create or edit. Omitted profile fields keep their current
/// value, or a placeholder for new candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub position: PositionId,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CandidateSpec {
    /// Build the stored profile, starting from `existing` if this is an edit.
    pub fn into_core(self, existing: Option<&CandidateCore>) -> CandidateCore {
        let base = match existing {
            Some(existing) => {
                let image_url = if existing.has_placeholder_image() {
                    placeholder_image(&self.name)
                } else {
                    existing.image_url.clone()
                };
                CandidateCore {
                    image_url,
                    ..existing.clone()
                }
            }
            None => CandidateCore::new(self.name.clone(), self.position.clone()),
        };
        CandidateCore {
            name: self.name,
            position: self.position,
            bio: self.bio.unwrap_or(base.bio),
            platform: self.platform.unwrap_or(base.platform),
            image_url: self.image_url.unwrap_or(base.image_url),
        }
    }
}

/// A candidate with their current tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDesc {
    pub id: CandidateId,
    pub name: String,
    pub position: PositionId,
    pub bio: String,
    pub platform: String,
    pub image_url: String,
    pub votes: u64,
}

impl From<Candidate> for CandidateDesc {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            votes: candidate.votes,
            name: candidate.candidate.name,
            position: candidate.candidate.position,
            bio: candidate.candidate.bio,
            platform: candidate.candidate.platform,
            image_url: candidate.candidate.image_url,
        }
    }
}
