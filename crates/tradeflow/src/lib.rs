//! Tradeflow — staged multi-role market analysis pipeline.
//!
//! A request names an instrument, a depth and a set of analysts. The
//! [`StageOrchestrator`] walks it through data collection, the analyst team,
//! a bull/bear research debate, the trader, a three-stance risk debate, the
//! final decision and a reflection pass. Roles are reached through
//! [`coordination::AgentGateway`]; market data through [`MarketDataSource`].

pub mod config;
pub mod data;
pub mod orchestrator;
pub mod prompts;
pub mod stages;
pub mod state_machine;
pub mod types;

pub use config::{DebatePolicy, PipelineConfig, RetryConfig};
pub use data::{DataSourceError, MarketDataSource, SharedDataSource, StaticDataSource};
pub use orchestrator::{RunError, RunResult, RunStatus, StageOrchestrator, StageResult};
pub use stages::{StageScores, TradeAction};
pub use state_machine::{PipelineStage, StageMachine, TransitionRecord};
pub use types::{AnalysisDepth, AnalysisRequest, AnalystRole, RequestError};
