use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::WindowState,
    db::{ElectionSettings, InvalidWindow},
};

/// An administrator's change to the voting window. Omitted times are unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionSettingsSpec {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl TryFrom<ElectionSettingsSpec> for ElectionSettings {
    type Error = InvalidWindow;

    fn try_from(spec: ElectionSettingsSpec) -> Result<Self, Self::Error> {
        ElectionSettings::new(spec.start_time, spec.end_time)
    }
}

/// The voting window and whether it is currently open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDesc {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub window: WindowState,
}

impl ElectionDesc {
    pub fn at(settings: &ElectionSettings, now: DateTime<Utc>) -> Self {
        Self {
            start_time: settings.start_time(),
            end_time: settings.end_time(),
            window: settings.window(now),
        }
    }
}
