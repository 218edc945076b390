//! Pipeline stage machine — fixed stage order and legal transition guards.
//!
//! Every run walks the same stages in the same order. The machine rejects
//! skipped or repeated stages and records each transition so a finished run
//! can be audited.
//!
//! ```text
//! Idle → DataCollection → AnalystTeam → ResearchDebate → TradingStrategy
//!      → RiskAssessment → FinalDecision → Reflection → Completed
//!
//! any non-terminal ─┬─▶ Interrupted
//!                   └─▶ Failed
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    /// Market data fetch. Fatal on failure.
    DataCollection,
    /// One report per selected analyst.
    AnalystTeam,
    /// Bull/bear debate plus research manager synthesis.
    ResearchDebate,
    /// Trader turns the research plan into a proposal.
    TradingStrategy,
    /// Aggressive, conservative and neutral risk stances.
    RiskAssessment,
    /// Risk manager's final call.
    FinalDecision,
    /// Stage scoring and lessons learned.
    Reflection,
    Completed,
    Interrupted,
    Failed,
}

impl PipelineStage {
    /// Stages that do work, in execution order.
    pub const WORK_STAGES: [PipelineStage; 7] = [
        PipelineStage::DataCollection,
        PipelineStage::AnalystTeam,
        PipelineStage::ResearchDebate,
        PipelineStage::TradingStrategy,
        PipelineStage::RiskAssessment,
        PipelineStage::FinalDecision,
        PipelineStage::Reflection,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Failed)
    }

    /// Stage that follows this one on the happy path.
    pub fn next(self) -> Option<PipelineStage> {
        use PipelineStage::*;
        match self {
            Idle => Some(DataCollection),
            DataCollection => Some(AnalystTeam),
            AnalystTeam => Some(ResearchDebate),
            ResearchDebate => Some(TradingStrategy),
            TradingStrategy => Some(RiskAssessment),
            RiskAssessment => Some(FinalDecision),
            FinalDecision => Some(Reflection),
            Reflection => Some(Completed),
            Completed | Interrupted | Failed => None,
        }
    }

    /// Progress percentage reported once this stage is entered.
    pub fn progress(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::DataCollection => 10,
            Self::AnalystTeam => 25,
            Self::ResearchDebate => 45,
            Self::TradingStrategy => 60,
            Self::RiskAssessment => 75,
            Self::FinalDecision => 85,
            Self::Reflection => 95,
            Self::Completed => 100,
            // terminal markers keep the last reported progress
            Self::Interrupted | Self::Failed => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DataCollection => "data_collection",
            Self::AnalystTeam => "analyst_team",
            Self::ResearchDebate => "research_debate",
            Self::TradingStrategy => "trading_strategy",
            Self::RiskAssessment => "risk_assessment",
            Self::FinalDecision => "final_decision",
            Self::Reflection => "reflection",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_legal_transition(from: PipelineStage, to: PipelineStage) -> bool {
    use PipelineStage::*;

    if matches!(to, Interrupted | Failed) && !from.is_terminal() {
        return true;
    }
    from.next() == Some(to)
}

/// A single recorded stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineStage,
    pub to: PipelineStage,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal stage transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current stage and the transition log of one run.
#[derive(Debug)]
pub struct StageMachine {
    current: PipelineStage,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StageMachine {
    /// Create a machine at `Idle`.
    pub fn new() -> Self {
        Self {
            current: PipelineStage::Idle,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.current
    }

    pub fn advance(
        &mut self,
        to: PipelineStage,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, "Stage transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineStage::Failed, Some(reason))
    }

    pub fn interrupt(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineStage::Interrupted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// `idle → completed (12ms) [data_collection → … → completed]`
    pub fn summary(&self) -> String {
        let states: Vec<&str> = self.transitions.iter().map(|t| t.to.as_str()).collect();
        let mut line = format!(
            "{} → {} ({}ms)",
            PipelineStage::Idle,
            self.current,
            self.created_at.elapsed().as_millis(),
        );
        if !states.is_empty() {
            line.push_str(&format!(" [{}]", states.join(" → ")));
        }
        line
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_visits_every_stage_once() {
        let mut sm = StageMachine::new();
        for stage in PipelineStage::WORK_STAGES {
            sm.advance(stage, None).unwrap();
        }
        sm.advance(PipelineStage::Completed, None).unwrap();

        assert!(sm.is_terminal());
        let visited: Vec<_> = sm.transitions().iter().map(|t| t.to).collect();
        assert_eq!(visited.len(), 8);
        assert_eq!(visited[0], PipelineStage::DataCollection);
        assert_eq!(visited[7], PipelineStage::Completed);
    }

    #[test]
    fn test_skipping_a_stage_is_illegal() {
        let mut sm = StageMachine::new();
        sm.advance(PipelineStage::DataCollection, None).unwrap();
        let err = sm.advance(PipelineStage::ResearchDebate, None).unwrap_err();
        assert_eq!(err.from, PipelineStage::DataCollection);
        assert_eq!(sm.current(), PipelineStage::DataCollection);
    }

    #[test]
    fn test_repeating_a_stage_is_illegal() {
        let mut sm = StageMachine::new();
        sm.advance(PipelineStage::DataCollection, None).unwrap();
        assert!(sm.advance(PipelineStage::DataCollection, None).is_err());
    }

    #[test]
    fn test_terminal_from_any_non_terminal() {
        let mut sm = StageMachine::new();
        sm.advance(PipelineStage::DataCollection, None).unwrap();
        sm.advance(PipelineStage::AnalystTeam, None).unwrap();
        sm.interrupt("user stop").unwrap();
        assert_eq!(sm.current(), PipelineStage::Interrupted);
        assert_eq!(sm.transitions()[2].reason.as_deref(), Some("user stop"));

        // no way out of a terminal state
        assert!(sm.fail("late").is_err());
        assert!(sm.advance(PipelineStage::ResearchDebate, None).is_err());
    }

    #[test]
    fn test_fail_from_idle() {
        let mut sm = StageMachine::new();
        sm.fail("bad request").unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut last = PipelineStage::Idle.progress();
        for stage in PipelineStage::WORK_STAGES {
            assert!(stage.progress() > last, "{stage} should advance progress");
            last = stage.progress();
        }
        assert_eq!(PipelineStage::Completed.progress(), 100);
    }

    #[test]
    fn test_summary() {
        let mut sm = StageMachine::new();
        sm.advance(PipelineStage::DataCollection, None).unwrap();
        sm.fail("no data").unwrap();
        let summary = sm.summary();
        assert!(summary.starts_with("idle → failed"));
        assert!(summary.contains("[data_collection → failed]"));
    }
}
