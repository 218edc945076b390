//! Debate records and argument counting.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upper bound on debate rounds.
pub const MAX_ROUNDS: u32 = 4;

/// Arguments each side must bring in round 1.
pub const FIRST_ROUND_ARGUMENTS: u32 = 3;

/// Enumerated or bulleted line: `1.`, `2)`, `3、`, `-`, `*`, `•`, `(4)`, `（5）`.
static ARGUMENT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]\s+|\d+、|[-*•]\s+|[（(]\d+[)）])")
        .expect("argument marker regex is valid")
});

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph regex is valid"));

/// Arguments required of each side in `round` (1-based).
pub fn required_arguments(round: u32) -> u32 {
    if round <= 1 {
        FIRST_ROUND_ARGUMENTS
    } else {
        round + 2
    }
}

/// Clamp a requested round count into `1..=MAX_ROUNDS`.
pub fn clamp_rounds(rounds: u32) -> u32 {
    rounds.clamp(1, MAX_ROUNDS)
}

/// Post-hoc argument count.
///
/// Counts enumerated/bulleted lines; text without markers falls back to the
/// number of non-empty paragraphs.
pub fn count_arguments(text: &str) -> u32 {
    let marked = ARGUMENT_MARKER.find_iter(text).count();
    let count = if marked > 0 {
        marked
    } else {
        PARAGRAPH_BREAK
            .split(text)
            .filter(|p| !p.trim().is_empty())
            .count()
    };
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Which side a debate turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    Proponent,
    Opponent,
}

impl std::fmt::Display for DebateSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proponent => write!(f, "proponent"),
            Self::Opponent => write!(f, "opponent"),
        }
    }
}

/// A turn that fell back to placeholder output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedTurn {
    pub round: u32,
    pub side: DebateSide,
    pub role: String,
    pub error: String,
}

/// One proponent/opponent exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateRound {
    pub round: u32,
    pub required_arguments: u32,
    pub proponent_output: String,
    pub opponent_output: String,
    pub proponent_argument_count: u32,
    pub opponent_argument_count: u32,
}

/// Which side brought more arguments overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaning {
    Proponent,
    Opponent,
    Even,
}

/// Aggregate argument tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTotals {
    pub proponent_arguments: u32,
    pub opponent_arguments: u32,
    pub required_arguments: u32,
}

/// Result of a complete debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateOutcome {
    pub topic: String,
    pub rounds: Vec<DebateRound>,
    pub synthesis: String,
    pub synthesis_degraded: bool,
    pub degraded_turns: Vec<DegradedTurn>,
    pub totals: DebateTotals,
}

impl DebateOutcome {
    pub fn leading_side(&self) -> Leaning {
        use std::cmp::Ordering;
        match self
            .totals
            .proponent_arguments
            .cmp(&self.totals.opponent_arguments)
        {
            Ordering::Greater => Leaning::Proponent,
            Ordering::Less => Leaning::Opponent,
            Ordering::Equal => Leaning::Even,
        }
    }

    /// Turns that produced real output, over all turns expected.
    pub fn completeness(&self) -> f64 {
        let expected = self.rounds.len() * 2;
        if expected == 0 {
            return 0.0;
        }
        let healthy = expected.saturating_sub(self.degraded_turns.len());
        healthy as f64 / expected as f64
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "{} rounds | proponent={} opponent={} required={} | degraded_turns={}{}",
            self.rounds.len(),
            self.totals.proponent_arguments,
            self.totals.opponent_arguments,
            self.totals.required_arguments,
            self.degraded_turns.len(),
            if self.synthesis_degraded {
                " | synthesis degraded"
            } else {
                ""
            },
        )
    }
}
