use serde::{Deserialize, Serialize};

/// Engine operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Interception disabled, calls go straight to the real dependency
    #[default]
    Off,
    /// Real calls are made and their outcomes captured
    Record,
    /// Calls are answered from captured outcomes only
    Replay,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Record => "record",
            Mode::Replay => "replay",
        }
    }

    /// Parse a mode name or its legacy numeric code (0, 1, 2).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Some(Mode::Off),
            "record" | "1" => Some(Mode::Record),
            "replay" | "2" => Some(Mode::Replay),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Mode::Off)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::parse(s).ok_or_else(|| format!("unknown mode: {s:?} (expected off, record or replay)"))
    }
}

/// Reason passed to the reset hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetKind {
    None = 0,
    /// The active storage was swapped for a new file
    Storage = 1,
    /// The bundle output directory rotated
    OutputDir = 2,
}
