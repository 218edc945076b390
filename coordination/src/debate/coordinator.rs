//! Debate coordinator: drives proponent/opponent rounds and the arbiter.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::prompts;
use super::state::{
    clamp_rounds, count_arguments, required_arguments, DebateOutcome, DebateRound, DebateSide,
    DebateTotals, DegradedTurn,
};
use crate::gateway::{AgentRequest, GatewayError, SharedGateway};
use crate::resilience::{RetryError, RetryExecutor, RetryPolicy};

/// Role identifiers used for each debate seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateRoles {
    pub proponent: String,
    pub opponent: String,
    pub arbiter: String,
}

impl Default for DebateRoles {
    fn default() -> Self {
        Self {
            proponent: "bull_researcher".to_string(),
            opponent: "bear_researcher".to_string(),
            arbiter: "research_manager".to_string(),
        }
    }
}

/// What the debate is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateContext {
    pub topic: String,
    /// Upstream reports both sides argue from.
    pub material: Value,
}

impl DebateContext {
    pub fn new(topic: impl Into<String>, material: Value) -> Self {
        Self {
            topic: topic.into(),
            material,
        }
    }
}

/// Error from the debate coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebateError {
    /// Cancellation observed during `round`.
    Interrupted { round: u32 },
}

impl std::fmt::Display for DebateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupted { round } => write!(f, "debate interrupted in round {}", round),
        }
    }
}

impl std::error::Error for DebateError {}

fn placeholder(role: &str, round: u32) -> String {
    format!("[{role} unavailable in round {round}: no argument recorded]")
}

pub struct DebateCoordinator {
    gateway: SharedGateway,
    executor: RetryExecutor,
    policy: RetryPolicy,
    roles: DebateRoles,
}

impl DebateCoordinator {
    pub fn new(gateway: SharedGateway, executor: RetryExecutor, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            executor,
            policy,
            roles: DebateRoles::default(),
        }
    }

    pub fn with_roles(mut self, roles: DebateRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn roles(&self) -> &DebateRoles {
        &self.roles
    }

    /// Invoke one role through the retry executor.
    async fn call(&self, request: AgentRequest) -> Result<String, RetryError<GatewayError>> {
        let role = request.role.clone();
        self.executor
            .retry_with_backoff(&role, &self.policy, || {
                self.gateway.invoke(request.clone())
            })
            .await
    }

    /// Run `rounds` rounds (clamped to `1..=4`) and a synthesis step.
    pub async fn run_debate(
        &self,
        context: &DebateContext,
        rounds: u32,
    ) -> Result<DebateOutcome, DebateError> {
        let rounds = clamp_rounds(rounds);
        info!(topic = %context.topic, rounds, "Debate started");

        let mut history: Vec<DebateRound> = Vec::with_capacity(rounds as usize);
        let mut degraded_turns = Vec::new();
        let mut totals = DebateTotals::default();
        let mut previous_opponent: Option<String> = None;

        for round in 1..=rounds {
            let required = required_arguments(round);

            let prompt = prompts::proponent_prompt(
                &context.topic,
                &context.material,
                round,
                required,
                previous_opponent.as_deref(),
            );
            let request = AgentRequest::new(
                &self.roles.proponent,
                prompt,
                json!({
                    "topic": context.topic,
                    "round": round,
                    "required_arguments": required,
                    "side": DebateSide::Proponent,
                }),
            );
            let (proponent_output, proponent_count) = self
                .turn(request, round, DebateSide::Proponent, &mut degraded_turns)
                .await?;

            let prompt = prompts::opponent_prompt(
                &context.topic,
                &context.material,
                round,
                required,
                &proponent_output,
            );
            let request = AgentRequest::new(
                &self.roles.opponent,
                prompt,
                json!({
                    "topic": context.topic,
                    "round": round,
                    "required_arguments": required,
                    "side": DebateSide::Opponent,
                }),
            );
            let (opponent_output, opponent_count) = self
                .turn(request, round, DebateSide::Opponent, &mut degraded_turns)
                .await?;

            totals.proponent_arguments += proponent_count;
            totals.opponent_arguments += opponent_count;
            totals.required_arguments += required * 2;

            previous_opponent = Some(opponent_output.clone());
            history.push(DebateRound {
                round,
                required_arguments: required,
                proponent_output,
                opponent_output,
                proponent_argument_count: proponent_count,
                opponent_argument_count: opponent_count,
            });
        }

        let prompt = prompts::arbiter_prompt(
            &context.topic,
            &history,
            totals.proponent_arguments,
            totals.opponent_arguments,
        );
        let exchanges: Vec<Value> = history
            .iter()
            .map(|r| json!([r.proponent_output, r.opponent_output]))
            .collect();
        let request = AgentRequest::new(
            &self.roles.arbiter,
            prompt,
            json!({
                "topic": context.topic,
                "history": exchanges,
                "totals": totals,
            }),
        );

        let (synthesis, synthesis_degraded) = match self.call(request).await {
            Ok(text) => (text, false),
            Err(RetryError::Interrupted { .. }) => {
                return Err(DebateError::Interrupted { round: rounds })
            }
            Err(e) => {
                warn!(role = %self.roles.arbiter, error = %e, "Synthesis degraded");
                (
                    format!(
                        "[{} unavailable: synthesis not produced]",
                        self.roles.arbiter
                    ),
                    true,
                )
            }
        };

        let outcome = DebateOutcome {
            topic: context.topic.clone(),
            rounds: history,
            synthesis,
            synthesis_degraded,
            degraded_turns,
            totals,
        };
        info!(summary = %outcome.summary_line(), "Debate finished");
        Ok(outcome)
    }

    async fn turn(
        &self,
        request: AgentRequest,
        round: u32,
        side: DebateSide,
        degraded: &mut Vec<DegradedTurn>,
    ) -> Result<(String, u32), DebateError> {
        let role = request.role.clone();
        match self.call(request).await {
            Ok(text) => {
                let count = count_arguments(&text);
                let required = required_arguments(round);
                if count < required {
                    warn!(role = %role, round, count, required, "Fewer arguments than required");
                }
                Ok((text, count))
            }
            Err(RetryError::Interrupted { .. }) => Err(DebateError::Interrupted { round }),
            Err(e) => {
                warn!(role = %role, round, side = %side, error = %e, "Debate turn degraded");
                degraded.push(DegradedTurn {
                    round,
                    side,
                    role: role.clone(),
                    error: e.to_string(),
                });
                Ok((placeholder(&role, round), 0))
            }
        }
    }
}

impl std::fmt::Debug for DebateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateCoordinator")
            .field("roles", &self.roles)
            .field("policy", &self.policy)
            .finish()
    }
}
