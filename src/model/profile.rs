use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{DetectError, Result};

/// Bumped whenever an entry of [`PROFILES`] changes.
pub const PROFILE_TABLE_VERSION: u32 = 1;

/// Model size multipliers selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Profile {
    pub name: &'static str,
    pub depth: f64,
    pub width: f64,
    pub depthwise: bool,
}

pub const PROFILES: [Profile; 6] = [
    Profile { name: "nano", depth: 0.33, width: 0.25, depthwise: true },
    Profile { name: "tiny", depth: 0.33, width: 0.375, depthwise: false },
    Profile { name: "s", depth: 0.33, width: 0.50, depthwise: false },
    Profile { name: "m", depth: 0.67, width: 0.75, depthwise: false },
    Profile { name: "l", depth: 1.00, width: 1.00, depthwise: false },
    Profile { name: "x", depth: 1.33, width: 1.25, depthwise: false },
];

impl Profile {
    pub fn from_name(name: &str) -> Result<Self> {
        PROFILES
            .iter()
            .find(|p| p.name == name)
            .copied()
            .ok_or_else(|| DetectError::UnknownProfile {
                name: name.to_string(),
                known: Self::names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        PROFILES.iter().map(|p| p.name)
    }
}

impl FromStr for Profile {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (depth={}, width={}, depthwise={})",
            self.name, self.depth, self.width, self.depthwise
        )
    }
}
