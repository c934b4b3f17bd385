use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum QosReliability {
    #[default]
    Reliable,
    BestEffort,
}

impl fmt::Display for QosReliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => write!(f, "Reliable"),
            Self::BestEffort => write!(f, "Best Effort"),
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosHistory {
    KeepLast(usize),
    KeepAll,
}

impl Default for QosHistory {
    fn default() -> Self {
        Self::KeepLast(10)
    }
}

impl QosHistory {
    /// Inbound queue bound for this history policy.
    pub fn depth(&self) -> usize {
        match self {
            Self::KeepLast(depth) => (*depth).max(1),
            Self::KeepAll => usize::MAX,
        }
    }
}

impl fmt::Display for QosHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepLast(depth) => write!(f, "Keep Last ({})", depth),
            Self::KeepAll => write!(f, "Keep All"),
        }
    }
}

#[derive(Debug, Default, Hash, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct QosProfile {
    #[serde(default)]
    pub reliability: QosReliability,
    #[serde(default)]
    pub history: QosHistory,
}

impl QosProfile {
    /// Reliable, keep last 10.
    pub const fn reliable() -> Self {
        Self {
            reliability: QosReliability::Reliable,
            history: QosHistory::KeepLast(10),
        }
    }

    /// Best effort, keep last 5 (sensor data style).
    pub const fn best_effort() -> Self {
        Self {
            reliability: QosReliability::BestEffort,
            history: QosHistory::KeepLast(5),
        }
    }

    pub fn with_history(mut self, history: QosHistory) -> Self {
        self.history = history;
        self
    }
}

impl fmt::Display for QosProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS({}, {})", self.reliability, self.history)
    }
}
