use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{common::WindowState, mongodb::optional_datetime};

/// The `_id` of the single settings document.
pub const SETTINGS_ID: &str = "election";

/// Election-wide settings: the voting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSettings {
    #[serde(default, with = "optional_datetime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_datetime")]
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Election start time must be before its end time")]
pub struct InvalidWindow;

impl ElectionSettings {
    /// Create settings, checking that the window is non-empty when both ends are set.
    pub fn new(
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Self, InvalidWindow> {
        if let (Some(start), Some(end)) = (start_time, end_time) {
            if start >= end {
                return Err(InvalidWindow);
            }
        }
        Ok(Self {
            start_time,
            end_time,
        })
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// The state of the voting window at the given time.
    pub fn window(&self, now: DateTime<Utc>) -> WindowState {
        WindowState::at(now, self.start_time, self.end_time)
    }
}
