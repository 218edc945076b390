//! Prompt text for each pipeline role.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes
//! so a stored result can be traced to the prompts that produced it.

use std::fmt::Write;

use serde_json::{Map, Value};

use crate::types::AnalystRole;

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

pub const TRADER_ROLE: &str = "trader";
pub const RISK_MANAGER_ROLE: &str = "risk_manager";
pub const REFLECTION_ROLE: &str = "reflection";

/// Risk debate seats, in speaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskStance {
    Aggressive,
    Conservative,
    Neutral,
}

impl RiskStance {
    pub const ALL: [RiskStance; 3] = [
        RiskStance::Aggressive,
        RiskStance::Conservative,
        RiskStance::Neutral,
    ];

    pub fn role_id(self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive_debator",
            Self::Conservative => "conservative_debator",
            Self::Neutral => "neutral_debator",
        }
    }

    fn preamble(self) -> &'static str {
        match self {
            Self::Aggressive => AGGRESSIVE_PREAMBLE,
            Self::Conservative => CONSERVATIVE_PREAMBLE,
            Self::Neutral => NEUTRAL_PREAMBLE,
        }
    }
}

const MARKET_PREAMBLE: &str = "\
You are a market analyst. Study price action and technical indicators \
(moving averages, MACD, RSI, Bollinger bands, volume) and describe trend, \
momentum and volatility. Finish with a table of the key signals.";

const SENTIMENT_PREAMBLE: &str = "\
You are a social media and sentiment analyst. Summarise what retail and \
institutional voices are saying about the company over the past week and \
how sentiment has shifted. Finish with a table of the key signals.";

const NEWS_PREAMBLE: &str = "\
You are a news analyst. Review recent company news and macroeconomic \
headlines relevant to trading this instrument. Separate facts from \
speculation. Finish with a table of the key signals.";

const FUNDAMENTALS_PREAMBLE: &str = "\
You are a fundamentals analyst. Examine financial statements, valuation \
ratios, insider transactions and company profile. Call out strengths and \
red flags. Finish with a table of the key signals.";

const TRADER_PREAMBLE: &str = "\
You are a trader. Turn the research team's investment plan into a concrete \
trading proposal: direction, sizing rationale, entry and exit levels. End \
with `FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**`.";

const AGGRESSIVE_PREAMBLE: &str = "\
You are the aggressive risk analyst. Champion high-reward opportunities in \
the trader's proposal and challenge overly cautious objections.";

const CONSERVATIVE_PREAMBLE: &str = "\
You are the conservative risk analyst. Protect capital: highlight downside \
scenarios, volatility and exposures the trader's proposal underweights.";

const NEUTRAL_PREAMBLE: &str = "\
You are the neutral risk analyst. Weigh the upside and downside of the \
trader's proposal and argue for a balanced adjustment where needed.";

const RISK_MANAGER_PREAMBLE: &str = "\
You are the risk manager and final judge. Evaluate the risk debate and the \
trader's proposal, then decide. Give a clear recommendation: BUY, SELL or \
HOLD, with the reasoning that settled it.";

const REFLECTION_PREAMBLE: &str = "\
You review a finished analysis run. Using the stage quality scores, explain \
what went well, what was weak, and one concrete lesson for the next run.";

fn analyst_preamble(role: AnalystRole) -> &'static str {
    match role {
        AnalystRole::Market => MARKET_PREAMBLE,
        AnalystRole::Sentiment => SENTIMENT_PREAMBLE,
        AnalystRole::News => NEWS_PREAMBLE,
        AnalystRole::Fundamentals => FUNDAMENTALS_PREAMBLE,
    }
}

fn json_block(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn analyst_prompt(role: AnalystRole, symbol: &str, market_data: &Value) -> String {
    format!(
        "{}\n\n## Instrument\n{symbol}\n\n## Market data\n{}\n",
        analyst_preamble(role),
        json_block(market_data)
    )
}

pub fn trader_prompt(symbol: &str, investment_plan: &str, reports: &Map<String, Value>) -> String {
    let mut prompt = format!(
        "{TRADER_PREAMBLE}\n\n## Instrument\n{symbol}\n\n## Investment plan\n{investment_plan}\n"
    );
    for (key, report) in reports {
        let _ = write!(prompt, "\n## {key}\n{}\n", report.as_str().unwrap_or_default());
    }
    prompt
}

pub fn risk_prompt(
    stance: RiskStance,
    symbol: &str,
    trader_plan: &str,
    earlier_views: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "{}\n\n## Instrument\n{symbol}\n\n## Trader's proposal\n{trader_plan}\n",
        stance.preamble()
    );
    for (role, view) in earlier_views {
        let _ = write!(prompt, "\n## View from {role}\n{view}\n");
    }
    prompt
}

pub fn risk_manager_prompt(
    symbol: &str,
    trader_plan: &str,
    views: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "{RISK_MANAGER_PREAMBLE}\n\n## Instrument\n{symbol}\n\n## Trader's proposal\n{trader_plan}\n"
    );
    for (role, view) in views {
        let _ = write!(prompt, "\n## {role}\n{view}\n");
    }
    prompt
}

pub fn reflection_prompt(symbol: &str, decision: &str, scores: &Value) -> String {
    format!(
        "{REFLECTION_PREAMBLE}\n\n## Instrument\n{symbol}\n\n## Decision\n{decision}\n\n## Stage scores\n{}\n",
        json_block(scores)
    )
}

/// Stand-in text recorded for a role that could not be reached.
pub fn placeholder(role: &str, reason: &str) -> String {
    format!("[{role} unavailable: {reason}]")
}
