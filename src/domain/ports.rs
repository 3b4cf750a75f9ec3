use crate::core::engine::DesignRequest;
use crate::core::model_builder::ConstraintModel;
use crate::domain::model::{ConstraintKind, SolveResult};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Shared stop signal for the plates of one request. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits for a single engine call.
#[derive(Debug, Clone)]
pub struct SolveLimits {
    pub deadline: Instant,
    pub seed: u64,
    pub cancel: CancelFlag,
}

impl SolveLimits {
    pub fn new(deadline: Instant, seed: u64) -> Self {
        Self {
            deadline,
            seed,
            cancel: CancelFlag::new(),
        }
    }

    /// Past the deadline or cancelled by a sibling plate.
    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }
}

/// Content index per plate cell (row-major); `None` is an empty well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub cells: Vec<Option<usize>>,
}

/// The rule an engine blames for an unsuccessful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub rule: ConstraintKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Feasible(Assignment),
    Infeasible(Option<Conflict>),
    TimedOut(Option<Conflict>),
}

/// Combinatorial search backend. Must honour every active constraint of the
/// model and return before `limits.deadline`, or soon after `limits.cancel` is set.
pub trait SolverEngine: Send + Sync {
    fn name(&self) -> &str;
    fn solve(&self, model: &ConstraintModel, limits: &SolveLimits) -> EngineOutcome;
}

#[async_trait]
pub trait DesignPipeline: Send + Sync {
    async fn load(&self) -> Result<DesignRequest>;
    async fn generate(&self, request: &DesignRequest) -> Result<SolveResult>;
    async fn export(&self, request: &DesignRequest, result: &SolveResult) -> Result<String>;
}
