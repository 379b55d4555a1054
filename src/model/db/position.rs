use serde::{Deserialize, Serialize};

use crate::model::common::{EmptyTitle, PositionId};

/// An office that candidates stand for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "_id")]
    pub id: PositionId,
    pub title: String,
}

impl Position {
    /// Create a position, deriving its ID from the title.
    pub fn new(title: &str) -> Result<Self, EmptyTitle> {
        let title = title.trim();
        Ok(Self {
            id: PositionId::from_title(title)?,
            title: title.to_string(),
        })
    }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl Position {
        pub fn president() -> Self {
            Self::new("President").unwrap()
        }

        pub fn treasurer() -> Self {
            Self::new("Treasurer").unwrap()
        }
    }
}
