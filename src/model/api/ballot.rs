use serde::{Deserialize, Serialize};

use crate::model::common::{CandidateId, PositionId};

/// One choice on a ballot: a candidate for a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub position_id: PositionId,
    pub candidate_id: CandidateId,
}

impl Selection {
    pub fn new(position_id: PositionId, candidate_id: CandidateId) -> Self {
        Self {
            position_id,
            candidate_id,
        }
    }
}
