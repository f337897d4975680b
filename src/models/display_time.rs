use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::ConfigError;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p %Z";

/// Timezone used for the human-readable timestamps stored next to UTC ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone(Tz);

impl DisplayZone {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        name.parse::<Tz>()
            .map(Self)
            .map_err(|err| ConfigError::invalid("display_timezone", format!("{name}: {err}")))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.0).format(DISPLAY_FORMAT).to_string()
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self(chrono_tz::America::New_York)
    }
}
