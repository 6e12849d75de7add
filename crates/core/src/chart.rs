//! Chart facts handed to context assembly by the chart engine.
//!
//! Everything here is already computed; this crate never does astronomy.
//! List-like facts carry a score so the assembler can keep the strongest
//! ones when a section budget is tight.

use serde::{Deserialize, Serialize};

/// Which reading template to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingType {
    Natal,
    Transit,
    Synastry,
}

impl ReadingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Natal => "natal",
            Self::Transit => "transit",
            Self::Synastry => "synastry",
        }
    }
}

/// One scored line of chart data (an aspect, a placement, a ruler, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFact {
    pub text: String,
    /// Strength; higher is more important.
    pub score: f64,
}

impl ScoredFact {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// The user's natal chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartFacts {
    /// Free-text overview (big three, chart shape, dominant element).
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub placements: Vec<ScoredFact>,
    #[serde(default)]
    pub aspects: Vec<ScoredFact>,
    #[serde(default)]
    pub house_rulers: Vec<ScoredFact>,
}

/// Time-dependent facts: current transits and progressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeContext {
    /// Human label for the moment the facts were computed for.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub transits: Vec<ScoredFact>,
    #[serde(default)]
    pub progressions: Vec<ScoredFact>,
}

/// The partner side of a synastry reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartnerFacts {
    #[serde(default)]
    pub name: Option<String>,
    /// Free-text profile of the partner's chart.
    #[serde(default)]
    pub profile: String,
    /// Cross-chart aspects between the user and the partner.
    #[serde(default)]
    pub synastry_aspects: Vec<ScoredFact>,
}
