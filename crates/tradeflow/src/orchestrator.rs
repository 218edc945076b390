//! Stage orchestrator — runs one analysis request through every stage.
//!
//! ```text
//! run(handle, request)
//!   ├─ validate request, claim RunHandle (refusals → RunError)
//!   ├─ for stage in DataCollection ..= Reflection:
//!   │     set_stage(stage, progress) → stage body → StageResult
//!   │     fatal failure → Failed { stage, reason }
//!   │     interrupt seen → Interrupted
//!   └─ finish(): RunResult with stages, transitions, failed_operations
//! ```
//!
//! Stages never overlap. Cancellation is checked after every stage and, via
//! the retry executor, before every role attempt.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coordination::{
    RetryExecutor, RunHandle, RunStateError, SharedGateway, SharedSignalBus, SignalType,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::config::{DebatePolicy, PipelineConfig};
use crate::data::SharedDataSource;
use crate::stages::{PipelineContext, StageEnv, StageFailure, StageOutput, TradeAction};
use crate::state_machine::{PipelineStage, StageMachine, TransitionRecord};
use crate::types::{AnalysisDepth, AnalysisRequest, RequestError};

/// How a started run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Interrupted {
        stage: PipelineStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Failed {
        stage: PipelineStage,
        reason: String,
    },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Interrupted { stage, .. } => write!(f, "interrupted after {}", stage),
            Self::Failed { stage, reason } => write!(f, "failed in {}: {}", stage, reason),
        }
    }
}

/// A run that never started.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error(transparent)]
    Busy(#[from] RunStateError),
}

/// Output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: PipelineStage,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub symbol: String,
    pub depth: AnalysisDepth,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<TradeAction>,
    pub failed_operations: Vec<String>,
    pub retry_counts: BTreeMap<String, u32>,
    pub transitions: Vec<TransitionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct StageOrchestrator {
    gateway: SharedGateway,
    data_source: SharedDataSource,
    config: PipelineConfig,
    signals: Option<SharedSignalBus>,
}

impl StageOrchestrator {
    pub fn new(gateway: SharedGateway, data_source: SharedDataSource) -> Self {
        Self {
            gateway,
            data_source,
            config: PipelineConfig::default(),
            signals: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Emit pipeline signals on `bus`.
    pub fn with_signal_bus(mut self, bus: SharedSignalBus) -> Self {
        self.signals = Some(bus);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `request` to completion, interruption or failure.
    ///
    /// Errors only when the run could not start; a started run always
    /// returns `Ok` with its terminal [`RunStatus`].
    pub async fn run(
        &self,
        run: &RunHandle,
        request: AnalysisRequest,
    ) -> Result<RunResult, RunError> {
        request.validate()?;
        // Finishes the handle even if this future is dropped mid-run.
        let guard = run.claim()?;
        let cancel = guard.token();

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            symbol = %request.symbol,
            depth = %request.depth,
            analysts = request.analysts.len(),
            "Analysis run started"
        );

        let executor = RetryExecutor::new(cancel).with_observer(Arc::new(run.clone()));
        let env = StageEnv {
            gateway: &self.gateway,
            data_source: &self.data_source,
            config: &self.config,
            executor: &executor,
            run,
            signals: self.signals.as_ref(),
        };
        let mut ctx = PipelineContext::new(
            &request.symbol,
            request.ordered_analysts(),
            DebatePolicy::for_depth(request.depth),
        );
        let mut machine = StageMachine::new();
        let mut stages = Vec::with_capacity(PipelineStage::WORK_STAGES.len());

        let mut status = RunStatus::Completed;
        for stage in PipelineStage::WORK_STAGES {
            if let Err(e) = machine.advance(stage, None) {
                error!(error = %e, "Stage order violated");
                status = RunStatus::Failed {
                    stage,
                    reason: e.to_string(),
                };
                break;
            }
            run.set_stage(stage.as_str(), stage.progress());
            info!(stage = %stage, progress = stage.progress(), "Stage started");

            match Self::execute(&env, stage, &mut ctx).await {
                Ok(StageOutput { payload, error }) => {
                    if let Some(err) = &error {
                        warn!(stage = %stage, error = %err, "Stage degraded");
                    }
                    stages.push(StageResult {
                        stage,
                        payload,
                        error,
                        interrupted: false,
                    });
                }
                Err(StageFailure::Fatal { reason, payload }) => {
                    error!(stage = %stage, reason = %reason, "Stage failed — aborting run");
                    stages.push(StageResult {
                        stage,
                        payload,
                        error: Some(reason.clone()),
                        interrupted: false,
                    });
                    let _ = machine.fail(&reason);
                    status = RunStatus::Failed { stage, reason };
                    break;
                }
                Err(StageFailure::Interrupted { payload }) => {
                    stages.push(StageResult {
                        stage,
                        payload,
                        error: None,
                        interrupted: true,
                    });
                    status = self.interrupted(&env, &mut machine, stage);
                    break;
                }
            }

            if run.should_interrupt() {
                status = self.interrupted(&env, &mut machine, stage);
                break;
            }
        }

        if status.is_completed() {
            let _ = machine.advance(PipelineStage::Completed, None);
            run.set_stage(
                PipelineStage::Completed.as_str(),
                PipelineStage::Completed.progress(),
            );
        }
        guard.finish();

        let snapshot = run.snapshot();
        let result = RunResult {
            run_id,
            symbol: request.symbol,
            depth: request.depth,
            status,
            stages,
            decision: ctx.decision,
            failed_operations: snapshot.failed_operations.into_iter().collect(),
            retry_counts: snapshot.retry_counts,
            transitions: machine.into_transitions(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            run_id = %result.run_id,
            status = %result.status,
            failed_operations = result.failed_operations.len(),
            "Analysis run finished"
        );
        Ok(result)
    }

    async fn execute(
        env: &StageEnv<'_>,
        stage: PipelineStage,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutput, StageFailure> {
        match stage {
            PipelineStage::DataCollection => env.collect_data(ctx).await,
            PipelineStage::AnalystTeam => env.run_analysts(ctx).await,
            PipelineStage::ResearchDebate => env.run_debate(ctx).await,
            PipelineStage::TradingStrategy => env.run_trader(ctx).await,
            PipelineStage::RiskAssessment => env.run_risk(ctx).await,
            PipelineStage::FinalDecision => env.run_decision(ctx).await,
            PipelineStage::Reflection => env.run_reflection(ctx).await,
            PipelineStage::Idle
            | PipelineStage::Completed
            | PipelineStage::Interrupted
            | PipelineStage::Failed => Ok(StageOutput::default()),
        }
    }

    fn interrupted(
        &self,
        env: &StageEnv<'_>,
        machine: &mut StageMachine,
        stage: PipelineStage,
    ) -> RunStatus {
        let reason = env.run.interrupt_reason();
        warn!(stage = %stage, reason = ?reason, "Run interrupted");
        let _ = machine.interrupt(reason.as_deref().unwrap_or("interrupt requested"));
        env.emit(
            SignalType::WorkflowControl,
            json!({
                "action": "interrupt",
                "stage": stage,
                "reason": reason,
            }),
        );
        RunStatus::Interrupted { stage, reason }
    }
}

impl std::fmt::Debug for StageOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageOrchestrator")
            .field("config", &self.config)
            .field("signals", &self.signals.is_some())
            .finish()
    }
}
