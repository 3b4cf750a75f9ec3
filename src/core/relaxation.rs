use crate::core::model_builder::ConstraintModel;
use crate::domain::model::{
    ConstraintKind, ConstraintViolation, RelaxationState, RELAXATION_ORDER,
};
use crate::domain::ports::{
    Assignment, CancelFlag, Conflict, EngineOutcome, SolveLimits, SolverEngine,
};
use crate::utils::error::{LayoutError, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Feasible,
    Infeasible,
    TimedOut,
}

impl AttemptOutcome {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Feasible => "solved",
            Self::Infeasible => "proved infeasible",
            Self::TimedOut => "ran out of time",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub stage: RelaxationState,
    pub outcome: AttemptOutcome,
    pub conflict: Option<Conflict>,
    pub elapsed: Duration,
}

/// A plate the controller managed to solve, possibly with soft rules relaxed.
#[derive(Debug, Clone)]
pub struct PlateSolution {
    pub model: ConstraintModel,
    pub assignment: Assignment,
    pub solved_at: RelaxationState,
    pub relaxed: Vec<ConstraintKind>,
    pub attempts: Vec<AttemptRecord>,
    pub elapsed: Duration,
}

/// Drives FULL -> RELAXED(4) -> RELAXED(3) -> RELAXED(2) -> FAILED.
pub struct RelaxationController<'e, E: SolverEngine + ?Sized> {
    engine: &'e E,
    seed: u64,
    cancel: CancelFlag,
}

impl<'e, E: SolverEngine + ?Sized> RelaxationController<'e, E> {
    pub fn new(engine: &'e E, seed: u64) -> Self {
        Self {
            engine,
            seed,
            cancel: CancelFlag::new(),
        }
    }

    /// Stops between stages, and inside the engine, once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Solves `model` within `budget`, never past `deadline`.
    ///
    /// The remaining time is split evenly over the stages still to try, so a
    /// stage that times out leaves its unused share to the next one.
    pub fn run(
        &self,
        mut model: ConstraintModel,
        budget: Duration,
        deadline: Option<Instant>,
    ) -> Result<PlateSolution> {
        let started = Instant::now();
        let budget_end = started + budget;
        let hard_deadline = deadline.map_or(budget_end, |d| d.min(budget_end));
        let plate = model.plate_index;

        let stages: Vec<RelaxationState> = std::iter::once(RelaxationState::Full)
            .chain(RELAXATION_ORDER.iter().map(|&p| RelaxationState::Relaxed(p)))
            .collect();

        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for (i, &stage) in stages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::debug!("Plate {}: cancelled before {}", plate + 1, stage);
                return Err(LayoutError::Cancelled { plate_index: plate });
            }
            if let RelaxationState::Relaxed(floor) = stage {
                let dropped = model.disable_priority(floor);
                let last_proved_infeasible = attempts
                    .last()
                    .is_some_and(|a| a.outcome == AttemptOutcome::Infeasible);
                if dropped.is_empty() && last_proved_infeasible {
                    tracing::debug!("Plate {}: {} changes nothing, skipping", plate + 1, stage);
                    continue;
                }
                tracing::warn!(
                    "Plate {}: relaxing to {} (dropping {:?})",
                    plate + 1,
                    stage,
                    dropped.iter().map(|k| k.name()).collect::<Vec<_>>()
                );
            }

            let now = Instant::now();
            if now >= hard_deadline {
                tracing::error!(
                    "Plate {}: deadline reached before {} could be tried",
                    plate + 1,
                    stage
                );
                return Err(timeout(plate, &attempts, started.elapsed()));
            }

            let slice = (hard_deadline - now) / (stages.len() - i) as u32;
            let limits = SolveLimits {
                deadline: now + slice,
                seed: self.seed,
                cancel: self.cancel.clone(),
            };

            tracing::debug!(
                "Plate {}: {} attempt with {} engine, {:?} slice",
                plate + 1,
                stage,
                self.engine.name(),
                slice
            );

            let outcome = self.engine.solve(&model, &limits);
            let elapsed = now.elapsed();
            match outcome {
                EngineOutcome::Feasible(assignment) => {
                    attempts.push(AttemptRecord {
                        stage,
                        outcome: AttemptOutcome::Feasible,
                        conflict: None,
                        elapsed,
                    });
                    let relaxed = model.relaxed();
                    tracing::info!(
                        "Plate {}: solved at {} in {:?}",
                        plate + 1,
                        stage,
                        started.elapsed()
                    );
                    return Ok(PlateSolution {
                        model,
                        assignment,
                        solved_at: stage,
                        relaxed,
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                EngineOutcome::Infeasible(conflict) => attempts.push(AttemptRecord {
                    stage,
                    outcome: AttemptOutcome::Infeasible,
                    conflict,
                    elapsed,
                }),
                EngineOutcome::TimedOut(conflict) => attempts.push(AttemptRecord {
                    stage,
                    outcome: AttemptOutcome::TimedOut,
                    conflict,
                    elapsed,
                }),
            }
        }

        match attempts.last() {
            Some(last) if last.outcome == AttemptOutcome::Infeasible => {
                tracing::error!("Plate {}: no layout at {}", plate + 1, last.stage);
                Err(LayoutError::NoSolutionError {
                    plate_index: plate,
                    stage: last.stage,
                    diagnostics: diagnostics(last),
                })
            }
            _ => Err(timeout(plate, &attempts, started.elapsed())),
        }
    }
}

/// Why each unsuccessful stage before the solving one gave way, one entry per
/// attempt that named a blocking rule.
pub fn relaxation_reasons(attempts: &[AttemptRecord]) -> Vec<ConstraintViolation> {
    attempts
        .iter()
        .filter(|a| a.outcome != AttemptOutcome::Feasible)
        .filter_map(|a| {
            a.conflict.as_ref().map(|conflict| {
                ConstraintViolation::new(
                    conflict.rule,
                    Vec::new(),
                    format!(
                        "{} {} on {}: {}",
                        a.stage,
                        a.outcome.describe(),
                        conflict.rule,
                        conflict.detail
                    ),
                )
            })
        })
        .collect()
}

fn diagnostics(attempt: &AttemptRecord) -> Vec<ConstraintViolation> {
    attempt
        .conflict
        .iter()
        .map(|conflict| {
            ConstraintViolation::new(
                conflict.rule,
                Vec::new(),
                format!("{} {}", conflict.rule.explanation(), conflict.detail),
            )
        })
        .collect()
}

fn timeout(plate: usize, attempts: &[AttemptRecord], elapsed: Duration) -> LayoutError {
    let (stage, diagnostics) = attempts
        .last()
        .map(|a| (a.stage, diagnostics(a)))
        .unwrap_or((RelaxationState::Full, Vec::new()));
    LayoutError::SolverTimeout {
        plate_index: plate,
        stage,
        elapsed,
        diagnostics,
    }
}
