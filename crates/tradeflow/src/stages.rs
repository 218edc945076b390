//! Stage bodies.
//!
//! Each stage reads what earlier stages left in [`PipelineContext`], calls
//! its roles through the retry executor and classifies failure:
//! data collection is fatal, everything downstream degrades to placeholder
//! output and records the failing role in `failed_operations`.

use std::sync::LazyLock;

use coordination::debate::{DebateContext, DebateCoordinator, DebateOutcome};
use coordination::{
    AgentRequest, GatewayError, RetryError, RetryExecutor, RetryPolicy, RunHandle,
    SharedGateway, SharedSignalBus, SignalType,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::{DebatePolicy, PipelineConfig};
use crate::data::SharedDataSource;
use crate::prompts::{self, RiskStance, REFLECTION_ROLE, RISK_MANAGER_ROLE, TRADER_ROLE};
use crate::types::AnalystRole;

const ORCHESTRATOR_SENDER: &str = "stage_orchestrator";

static PROPOSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)FINAL TRANSACTION PROPOSAL:\s*\**\s*(BUY|HOLD|SELL)")
        .expect("proposal regex is valid")
});

static ACTION_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(BUY|HOLD|SELL)\b").expect("action regex is valid"));

/// Trade direction pulled out of role output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Hold,
    Sell,
}

impl TradeAction {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "HOLD" => Some(Self::Hold),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Explicit `FINAL TRANSACTION PROPOSAL` line first, else the last
    /// upper-case BUY/HOLD/SELL in the text.
    pub fn extract(text: &str) -> Option<Self> {
        if let Some(caps) = PROPOSAL.captures(text) {
            return Self::from_word(&caps[1]);
        }
        ACTION_WORD
            .find_iter(text)
            .last()
            .and_then(|m| Self::from_word(m.as_str()))
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Per-stage quality, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageScores {
    pub data_collection: f64,
    pub analyst_team: f64,
    pub research_debate: f64,
    pub trading_strategy: f64,
    pub risk_assessment: f64,
    pub final_decision: f64,
    pub overall: f64,
}

fn healthy(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}

fn ratio(ok: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        ok as f64 / total as f64
    }
}

/// Everything earlier stages produced, threaded through the run.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub symbol: String,
    pub analysts: Vec<AnalystRole>,
    pub debate_rounds: u32,
    pub market_data: Option<Value>,
    /// report key → report text
    pub reports: Map<String, Value>,
    pub failed_analysts: Vec<String>,
    pub debate: Option<DebateOutcome>,
    pub investment_plan: String,
    pub trader_plan: Option<String>,
    /// (role, view) of stances that answered
    pub risk_views: Vec<(String, String)>,
    pub degraded_stances: Vec<String>,
    pub final_decision: Option<String>,
    pub decision: Option<TradeAction>,
}

impl PipelineContext {
    pub fn new(symbol: &str, analysts: Vec<AnalystRole>, debate: DebatePolicy) -> Self {
        Self {
            symbol: symbol.to_string(),
            analysts,
            debate_rounds: debate.rounds,
            ..Default::default()
        }
    }

    pub fn scores(&self) -> StageScores {
        let data_collection = healthy(self.market_data.is_some());
        let produced = self
            .analysts
            .iter()
            .filter(|role| self.reports.contains_key(role.report_key()))
            .filter(|role| !self.failed_analysts.iter().any(|f| f == role.role_id()))
            .count();
        let analyst_team = ratio(produced, self.analysts.len());
        let research_debate = match &self.debate {
            Some(d) => 0.4 * d.completeness() + 0.6 * healthy(!d.synthesis_degraded),
            None => 0.0,
        };
        let trading_strategy = healthy(self.trader_plan.is_some());
        let risk_assessment = ratio(self.risk_views.len(), RiskStance::ALL.len());
        let final_decision = healthy(self.final_decision.is_some());
        let parts = [
            data_collection,
            analyst_team,
            research_debate,
            trading_strategy,
            risk_assessment,
            final_decision,
        ];
        StageScores {
            data_collection,
            analyst_team,
            research_debate,
            trading_strategy,
            risk_assessment,
            final_decision,
            overall: parts.iter().sum::<f64>() / parts.len() as f64,
        }
    }
}

/// What a finished stage hands back.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub payload: Map<String, Value>,
    /// Set when the stage ran degraded.
    pub error: Option<String>,
}

/// Ways a stage can stop the run.
#[derive(Debug)]
pub enum StageFailure {
    Fatal {
        reason: String,
        payload: Map<String, Value>,
    },
    Interrupted {
        payload: Map<String, Value>,
    },
}

/// Role output; `error` is set when `text` is a placeholder.
struct Turn {
    text: String,
    error: Option<String>,
}

/// Cancellation observed inside a role call.
struct Interrupted;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Borrowed collaborators for one run's stages.
pub struct StageEnv<'a> {
    pub gateway: &'a SharedGateway,
    pub data_source: &'a SharedDataSource,
    pub config: &'a PipelineConfig,
    pub executor: &'a RetryExecutor,
    pub run: &'a RunHandle,
    pub signals: Option<&'a SharedSignalBus>,
}

impl StageEnv<'_> {
    /// Fire-and-forget signal emission.
    pub fn emit(&self, signal_type: SignalType, payload: Value) {
        if let Some(bus) = self.signals {
            if let Err(e) = bus.broadcast(signal_type, ORCHESTRATOR_SENDER, payload) {
                warn!(signal_type = %signal_type, error = %e, "Failed to emit signal");
            }
        }
    }

    async fn call(
        &self,
        role: &str,
        prompt: String,
        context: Value,
        policy: &RetryPolicy,
    ) -> Result<String, RetryError<GatewayError>> {
        let request = AgentRequest::new(role, prompt, context);
        self.executor
            .retry_with_backoff(role, policy, || self.gateway.invoke(request.clone()))
            .await
    }

    /// Call a role whose failure degrades rather than aborts.
    async fn degraded_call(
        &self,
        role: &str,
        prompt: String,
        context: Value,
        policy: &RetryPolicy,
    ) -> Result<Turn, Interrupted> {
        match self.call(role, prompt, context, policy).await {
            Ok(text) => Ok(Turn { text, error: None }),
            Err(RetryError::Interrupted { .. }) => Err(Interrupted),
            Err(e) => {
                let reason = e.to_string();
                warn!(role, error = %reason, "Role degraded to placeholder");
                self.run.mark_failed(role);
                Ok(Turn {
                    text: prompts::placeholder(role, &reason),
                    error: Some(reason),
                })
            }
        }
    }

    pub async fn collect_data(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        let policy = self.config.retry.data_policy();
        let symbol = ctx.symbol.clone();
        let fetched = self
            .executor
            .retry_with_backoff("data_collection", &policy, || {
                self.data_source.fetch(&symbol)
            })
            .await;

        match fetched {
            Ok(data) => {
                info!(symbol = %symbol, "Market data collected");
                ctx.market_data = Some(data.clone());
                self.emit(
                    SignalType::DataUpdate,
                    json!({ "data_type": "market_data", "symbol": symbol }),
                );
                Ok(StageOutput {
                    payload: object(json!({ "market_data": data })),
                    error: None,
                })
            }
            Err(RetryError::Interrupted { .. }) => Err(StageFailure::Interrupted {
                payload: Map::new(),
            }),
            Err(e) => Err(StageFailure::Fatal {
                reason: format!("data collection failed: {e}"),
                payload: Map::new(),
            }),
        }
    }

    pub async fn run_analysts(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        let policy = self.config.retry.agent_policy();
        let market_data = ctx.market_data.clone().unwrap_or(Value::Null);
        let analysts = ctx.analysts.clone();

        let request_for = |role: AnalystRole| {
            (
                prompts::analyst_prompt(role, &ctx.symbol, &market_data),
                json!({ "symbol": ctx.symbol, "report": role.report_key() }),
            )
        };

        let mut turns: Vec<(AnalystRole, Result<Turn, Interrupted>)> = Vec::new();
        if self.config.parallel_analysts {
            let calls = analysts.iter().map(|&role| {
                let (prompt, context) = request_for(role);
                let policy = &policy;
                async move { (role, self.degraded_call(role.role_id(), prompt, context, policy).await) }
            });
            turns = futures::future::join_all(calls).await;
        } else {
            for &role in &analysts {
                let (prompt, context) = request_for(role);
                let turn = self.degraded_call(role.role_id(), prompt, context, &policy).await;
                let stop = turn.is_err();
                turns.push((role, turn));
                if stop {
                    break;
                }
            }
        }

        let mut interrupted = false;
        for (role, turn) in turns {
            match turn {
                Ok(turn) => {
                    if turn.error.is_some() {
                        ctx.failed_analysts.push(role.role_id().to_string());
                    } else {
                        self.emit(
                            SignalType::AnalysisComplete,
                            json!({ "agent_id": role.role_id(), "symbol": ctx.symbol }),
                        );
                    }
                    ctx.reports
                        .insert(role.report_key().to_string(), Value::String(turn.text));
                }
                Err(Interrupted) => interrupted = true,
            }
        }

        let mut payload = ctx.reports.clone();
        payload.insert("failed_analysts".to_string(), json!(ctx.failed_analysts));
        if interrupted {
            return Err(StageFailure::Interrupted { payload });
        }

        let error = (!ctx.failed_analysts.is_empty()).then(|| {
            format!(
                "{} of {} analysts unavailable: {}",
                ctx.failed_analysts.len(),
                analysts.len(),
                ctx.failed_analysts.join(", ")
            )
        });
        Ok(StageOutput { payload, error })
    }

    pub async fn run_debate(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        let coordinator = DebateCoordinator::new(
            self.gateway.clone(),
            self.executor.clone(),
            self.config.retry.agent_policy(),
        );
        let roles = coordinator.roles().clone();
        self.emit(
            SignalType::DebateRequest,
            json!({
                "topic": ctx.symbol,
                "participants": [roles.proponent, roles.opponent],
                "requester": roles.arbiter,
                "rounds": ctx.debate_rounds,
            }),
        );

        let context = DebateContext::new(ctx.symbol.clone(), Value::Object(ctx.reports.clone()));
        let outcome = match coordinator.run_debate(&context, ctx.debate_rounds).await {
            Ok(outcome) => outcome,
            Err(e) => {
                info!(error = %e, "Research debate interrupted");
                return Err(StageFailure::Interrupted {
                    payload: Map::new(),
                });
            }
        };

        for turn in &outcome.degraded_turns {
            self.run.mark_failed(&turn.role);
        }
        if outcome.synthesis_degraded {
            self.run.mark_failed(&roles.arbiter);
        }

        let error = if outcome.degraded_turns.is_empty() && !outcome.synthesis_degraded {
            None
        } else {
            Some(outcome.summary_line())
        };
        ctx.investment_plan = outcome.synthesis.clone();
        let payload = object(json!({
            "investment_plan": outcome.synthesis,
            "leading_side": outcome.leading_side(),
            "debate": outcome,
        }));
        ctx.debate = Some(outcome);
        Ok(StageOutput { payload, error })
    }

    pub async fn run_trader(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        let prompt = prompts::trader_prompt(&ctx.symbol, &ctx.investment_plan, &ctx.reports);
        let turn = self
            .degraded_call(
                TRADER_ROLE,
                prompt,
                json!({ "symbol": ctx.symbol }),
                &self.config.retry.llm_policy(),
            )
            .await
            .map_err(|Interrupted| StageFailure::Interrupted {
                payload: Map::new(),
            })?;

        let proposed = turn
            .error
            .is_none()
            .then(|| TradeAction::extract(&turn.text))
            .flatten();
        if turn.error.is_none() {
            ctx.trader_plan = Some(turn.text.clone());
        }
        Ok(StageOutput {
            payload: object(json!({
                "trader_investment_plan": turn.text,
                "proposed_action": proposed,
            })),
            error: turn.error,
        })
    }

    pub async fn run_risk(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageFailure> {
        let policy = self.config.retry.llm_policy();
        let trader_plan = ctx
            .trader_plan
            .clone()
            .unwrap_or_else(|| prompts::placeholder(TRADER_ROLE, "no proposal"));

        let mut views = Map::new();
        for stance in RiskStance::ALL {
            let role = stance.role_id();
            let prompt = prompts::risk_prompt(stance, &ctx.symbol, &trader_plan, &ctx.risk_views);
            let turn = match self
                .degraded_call(role, prompt, json!({ "symbol": ctx.symbol }), &policy)
                .await
            {
                Ok(turn) => turn,
                Err(Interrupted) => {
                    return Err(StageFailure::Interrupted {
                        payload: object(json!({ "risk_views": views })),
                    })
                }
            };
            if turn.error.is_some() {
                ctx.degraded_stances.push(role.to_string());
            } else {
                ctx.risk_views.push((role.to_string(), turn.text.clone()));
            }
            views.insert(role.to_string(), Value::String(turn.text));
        }

        let error = if ctx.degraded_stances.is_empty() {
            None
        } else {
            self.emit(
                SignalType::RiskAlert,
                json!({
                    "risk_level": "elevated",
                    "description": format!(
                        "risk assessment incomplete: {} unavailable",
                        ctx.degraded_stances.join(", ")
                    ),
                    "symbol": ctx.symbol,
                }),
            );
            Some(format!(
                "{} of {} risk stances unavailable",
                ctx.degraded_stances.len(),
                RiskStance::ALL.len()
            ))
        };

        Ok(StageOutput {
            payload: object(json!({
                "risk_views": views,
                "degraded_stances": ctx.degraded_stances,
            })),
            error,
        })
    }

    pub async fn run_decision(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        self.emit(
            SignalType::DecisionRequired,
            json!({ "decision_type": "final_trade_decision", "symbol": ctx.symbol }),
        );
        let trader_plan = ctx
            .trader_plan
            .clone()
            .unwrap_or_else(|| prompts::placeholder(TRADER_ROLE, "no proposal"));
        let prompt = prompts::risk_manager_prompt(&ctx.symbol, &trader_plan, &ctx.risk_views);
        let turn = self
            .degraded_call(
                RISK_MANAGER_ROLE,
                prompt,
                json!({ "symbol": ctx.symbol }),
                &self.config.retry.llm_policy(),
            )
            .await
            .map_err(|Interrupted| StageFailure::Interrupted {
                payload: Map::new(),
            })?;

        if turn.error.is_none() {
            ctx.decision = TradeAction::extract(&turn.text);
            ctx.final_decision = Some(turn.text.clone());
        }
        Ok(StageOutput {
            payload: object(json!({
                "final_trade_decision": turn.text,
                "action": ctx.decision,
            })),
            error: turn.error,
        })
    }

    pub async fn run_reflection(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        let scores = ctx.scores();
        let scores_json = json!(scores);
        info!(overall = scores.overall, "Stage scores computed");

        let decision = ctx
            .final_decision
            .clone()
            .unwrap_or_else(|| prompts::placeholder(RISK_MANAGER_ROLE, "no decision"));
        let prompt = prompts::reflection_prompt(&ctx.symbol, &decision, &scores_json);
        let turn = self
            .degraded_call(
                REFLECTION_ROLE,
                prompt,
                json!({ "symbol": ctx.symbol, "scores": scores_json }),
                &self.config.retry.llm_policy(),
            )
            .await
            .map_err(|Interrupted| StageFailure::Interrupted {
                payload: object(json!({ "scores": scores_json })),
            })?;

        Ok(StageOutput {
            payload: object(json!({
                "scores": scores_json,
                "lessons": turn.text,
            })),
            error: turn.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prefers_proposal_line() {
        let text = "We considered a SELL earlier.\nFINAL TRANSACTION PROPOSAL: **BUY**";
        assert_eq!(TradeAction::extract(text), Some(TradeAction::Buy));
    }

    #[test]
    fn test_extract_falls_back_to_last_word() {
        assert_eq!(
            TradeAction::extract("BUY was tempting, but we HOLD."),
            Some(TradeAction::Hold)
        );
        // lower-case prose is not a decision
        assert_eq!(TradeAction::extract("we hold our breath"), None);
    }

    #[test]
    fn test_scores_for_empty_context() {
        let ctx = PipelineContext::new("AAPL", vec![AnalystRole::Market], DebatePolicy { rounds: 1 });
        let scores = ctx.scores();
        assert_eq!(scores.data_collection, 0.0);
        assert_eq!(scores.analyst_team, 0.0);
        assert_eq!(scores.overall, 0.0);
    }

    #[test]
    fn test_analyst_score_counts_only_produced_reports() {
        let mut ctx = PipelineContext::new(
            "AAPL",
            vec![AnalystRole::Market, AnalystRole::News],
            DebatePolicy { rounds: 1 },
        );
        ctx.reports.insert("market_report".into(), json!("up"));
        // news never ran
        assert_eq!(ctx.scores().analyst_team, 0.5);
    }

    #[test]
    fn test_scores_mix_partial_stages() {
        let mut ctx = PipelineContext::new(
            "AAPL",
            vec![AnalystRole::Market, AnalystRole::News],
            DebatePolicy { rounds: 1 },
        );
        ctx.market_data = Some(json!({}));
        ctx.reports.insert("market_report".into(), json!("up"));
        ctx.reports.insert("news_report".into(), json!("placeholder"));
        ctx.failed_analysts.push("news_analyst".into());
        ctx.trader_plan = Some("buy".into());
        ctx.risk_views = vec![
            ("aggressive_debator".into(), "a".into()),
            ("neutral_debator".into(), "n".into()),
            ("conservative_debator".into(), "c".into()),
        ];
        ctx.final_decision = Some("BUY".into());

        let scores = ctx.scores();
        assert_eq!(scores.analyst_team, 0.5);
        assert_eq!(scores.research_debate, 0.0);
        assert_eq!(scores.risk_assessment, 1.0);
        assert!((scores.overall - 4.5 / 6.0).abs() < 1e-9);
    }
}
