use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether ballots may currently be cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    /// The start time is in the future.
    Pending,
    Open,
    /// The end time has passed.
    Closed,
}

impl WindowState {
    /// Evaluate the window at `now`. Both bounds are inclusive, and an unset
    /// bound places no restriction on that side.
    pub fn at(now: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        match (start, end) {
            (Some(start), _) if now < start => Self::Pending,
            (_, Some(end)) if now > end => Self::Closed,
            _ => Self::Open,
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}
