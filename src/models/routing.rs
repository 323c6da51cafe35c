//! Subject routes and the classifier output mapping policy.
//!
//! Downstream code routes on the closed [`SubjectRoute`] enum, never on
//! free-form model output. The mapping from raw classifier text to a route
//! is centralized in [`RoutingResult::from_classifier_output`] so that every
//! caller gets the same fallback behavior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed set of dispatch targets for a student turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectRoute {
    /// Arithmetic, algebra, geometry, calculus, statistics
    Math,
    /// Historical events, dates, people, civilizations
    History,
    /// Grammar, writing, literature, generic Q&A (safe fallback)
    English,
    /// Hand off to a human teacher
    Escalate,
}

impl SubjectRoute {
    /// All valid routes, in classifier-prompt order.
    pub const ALL: [SubjectRoute; 4] = [
        SubjectRoute::Math,
        SubjectRoute::History,
        SubjectRoute::English,
        SubjectRoute::Escalate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectRoute::Math => "math",
            SubjectRoute::History => "history",
            SubjectRoute::English => "english",
            SubjectRoute::Escalate => "escalate",
        }
    }
}

impl fmt::Display for SubjectRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "math" => Ok(SubjectRoute::Math),
            "history" => Ok(SubjectRoute::History),
            "english" => Ok(SubjectRoute::English),
            "escalate" => Ok(SubjectRoute::Escalate),
            _ => Err(format!(
                "invalid subject route: '{}'. Valid: math, history, english, escalate",
                s
            )),
        }
    }
}

// ============================================================================
// Routing Result
// ============================================================================

/// Outcome of intent classification for one utterance.
///
/// Confidence is a discrete ladder, not a model-reported score:
/// - `1.0` — classifier answered with exactly one route token
/// - `0.8` — exactly one route token appeared inside longer text
///   (untrusted; the subject falls back to english)
/// - `0.5` — unknown output or upstream failure (english fallback)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingResult {
    /// Resolved dispatch target
    pub subject: SubjectRoute,
    /// Discrete confidence in [0, 1]
    pub confidence: f64,
    /// The raw classifier output, kept for audit rows
    pub raw: String,
}

impl RoutingResult {
    /// Map raw classifier output onto a route.
    ///
    /// The output is lowercased and trimmed before matching. Substring hits
    /// are recorded at confidence 0.8 but still route to english: a model
    /// that failed to answer with a single token is not trusted to route.
    pub fn from_classifier_output(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();

        if let Ok(subject) = normalized.parse::<SubjectRoute>() {
            return Self {
                subject,
                confidence: 1.0,
                raw: raw.to_string(),
            };
        }

        let hits = SubjectRoute::ALL
            .iter()
            .filter(|route| normalized.contains(route.as_str()))
            .count();
        if hits == 1 {
            return Self {
                subject: SubjectRoute::English,
                confidence: 0.8,
                raw: raw.to_string(),
            };
        }

        Self::fallback(raw)
    }

    /// The english/0.5 result used for unknown output and upstream errors.
    pub fn fallback(raw: impl Into<String>) -> Self {
        Self {
            subject: SubjectRoute::English,
            confidence: 0.5,
            raw: raw.into(),
        }
    }
}
