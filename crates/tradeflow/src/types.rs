//! Request types: what to analyse and how deeply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How thorough a run is. Selects the number of debate rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Quick,
    #[default]
    Standard,
    Deep,
    Comprehensive,
}

impl AnalysisDepth {
    pub fn debate_rounds(self) -> u32 {
        match self {
            Self::Quick => 1,
            Self::Standard => 2,
            Self::Deep => 3,
            Self::Comprehensive => 4,
        }
    }
}

impl fmt::Display for AnalysisDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Standard => write!(f, "standard"),
            Self::Deep => write!(f, "deep"),
            Self::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown analysis depth '{0}' (expected quick, standard, deep or comprehensive)")]
pub struct ParseDepthError(String);

impl FromStr for AnalysisDepth {
    type Err = ParseDepthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "shallow" => Ok(Self::Quick),
            "standard" | "medium" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            "comprehensive" => Ok(Self::Comprehensive),
            other => Err(ParseDepthError(other.to_string())),
        }
    }
}

/// Analyst seats on the analyst team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystRole {
    Market,
    Sentiment,
    News,
    Fundamentals,
}

impl AnalystRole {
    pub const ALL: [AnalystRole; 4] = [
        AnalystRole::Market,
        AnalystRole::Sentiment,
        AnalystRole::News,
        AnalystRole::Fundamentals,
    ];

    /// Stable role identifier used with the gateway and in `failed_operations`.
    pub fn role_id(self) -> &'static str {
        match self {
            Self::Market => "market_analyst",
            Self::Sentiment => "social_media_analyst",
            Self::News => "news_analyst",
            Self::Fundamentals => "fundamentals_analyst",
        }
    }

    /// Key of this analyst's report in stage payloads.
    pub fn report_key(self) -> &'static str {
        match self {
            Self::Market => "market_report",
            Self::Sentiment => "sentiment_report",
            Self::News => "news_report",
            Self::Fundamentals => "fundamentals_report",
        }
    }
}

impl fmt::Display for AnalystRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role_id())
    }
}

/// One pipeline run's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Ticker or other instrument identifier. Opaque to the pipeline.
    pub symbol: String,
    #[serde(default)]
    pub depth: AnalysisDepth,
    /// Analysts run in this order; duplicates are ignored.
    pub analysts: Vec<AnalystRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("at least one analyst must be selected")]
    NoAnalysts,
}

impl AnalysisRequest {
    pub fn new(symbol: impl Into<String>, depth: AnalysisDepth, analysts: Vec<AnalystRole>) -> Self {
        Self {
            symbol: symbol.into(),
            depth,
            analysts,
        }
    }

    /// Request with every analyst at the given depth.
    pub fn full_team(symbol: impl Into<String>, depth: AnalysisDepth) -> Self {
        Self::new(symbol, depth, AnalystRole::ALL.to_vec())
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.symbol.trim().is_empty() {
            return Err(RequestError::EmptySymbol);
        }
        if self.analysts.is_empty() {
            return Err(RequestError::NoAnalysts);
        }
        Ok(())
    }

    /// Analysts in request order with duplicates removed.
    pub fn ordered_analysts(&self) -> Vec<AnalystRole> {
        let mut seen = Vec::with_capacity(self.analysts.len());
        for role in &self.analysts {
            if !seen.contains(role) {
                seen.push(*role);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_rounds() {
        assert_eq!(AnalysisDepth::Quick.debate_rounds(), 1);
        assert_eq!(AnalysisDepth::Standard.debate_rounds(), 2);
        assert_eq!(AnalysisDepth::Deep.debate_rounds(), 3);
        assert_eq!(AnalysisDepth::Comprehensive.debate_rounds(), 4);
    }

    #[test]
    fn test_depth_parses_aliases() {
        assert_eq!("shallow".parse::<AnalysisDepth>().unwrap(), AnalysisDepth::Quick);
        assert_eq!("Medium".parse::<AnalysisDepth>().unwrap(), AnalysisDepth::Standard);
        assert_eq!(" deep ".parse::<AnalysisDepth>().unwrap(), AnalysisDepth::Deep);
        assert!("extreme".parse::<AnalysisDepth>().is_err());
    }

    #[test]
    fn test_validate() {
        let ok = AnalysisRequest::full_team("AAPL", AnalysisDepth::Quick);
        assert!(ok.validate().is_ok());

        let empty = AnalysisRequest::new("  ", AnalysisDepth::Quick, vec![AnalystRole::Market]);
        assert_eq!(empty.validate(), Err(RequestError::EmptySymbol));

        let none = AnalysisRequest::new("AAPL", AnalysisDepth::Quick, vec![]);
        assert_eq!(none.validate(), Err(RequestError::NoAnalysts));
    }

    #[test]
    fn test_ordered_analysts_dedups() {
        let req = AnalysisRequest::new(
            "AAPL",
            AnalysisDepth::Quick,
            vec![AnalystRole::News, AnalystRole::Market, AnalystRole::News],
        );
        assert_eq!(req.ordered_analysts(), vec![AnalystRole::News, AnalystRole::Market]);
    }

    #[test]
    fn test_request_deserializes_with_default_depth() {
        let req: AnalysisRequest =
            serde_json::from_str(r#"{"symbol":"NVDA","analysts":["market","news"]}"#).unwrap();
        assert_eq!(req.depth, AnalysisDepth::Standard);
        assert_eq!(req.analysts, vec![AnalystRole::Market, AnalystRole::News]);
    }
}
