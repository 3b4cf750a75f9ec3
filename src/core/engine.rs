use crate::adapters::backtracking::BacktrackingEngine;
use crate::core::capacity::{CapacityPlanner, PlateAllocation, DEFAULT_MAX_PLATES};
use crate::core::extractor::LayoutExtractor;
use crate::core::model_builder::{ConstraintModel, ConstraintModelBuilder};
use crate::core::relaxation::{relaxation_reasons, RelaxationController};
use crate::core::validator::ConstraintValidator;
use crate::domain::model::{
    ConstraintKind, DesignParameters, Layout, Manifest, PlateReport, SolveResult, SolveStatus,
    SourceInventory,
};
use crate::domain::ports::{CancelFlag, SolverEngine};
use crate::utils::error::{LayoutError, Result};
use crate::utils::validation::Validate;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle, JoinSet};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Wall-clock budget for the whole request.
    pub timeout: Duration,
    /// Caller deadline; the earlier of this and `timeout` wins.
    pub deadline: Option<Instant>,
    pub seed: u64,
    pub max_plates: usize,
    pub concurrent_plates: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            deadline: None,
            seed: 0,
            max_plates: DEFAULT_MAX_PLATES,
            concurrent_plates: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub manifest: Manifest,
    pub params: DesignParameters,
    pub options: SolveOptions,
}

impl GenerationRequest {
    pub fn new(manifest: Manifest, params: DesignParameters) -> Self {
        Self {
            manifest,
            params,
            options: SolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SolveOptions) -> Self {
        self.options = options;
        self
    }
}

/// A generation request plus the source plates its picklist is drawn from.
#[derive(Debug, Clone)]
pub struct DesignRequest {
    pub generation: GenerationRequest,
    pub inventory: SourceInventory,
}

/// Everything one plate needs on a worker thread.
struct PlateJob {
    model: ConstraintModel,
    allocation: PlateAllocation,
    params: DesignParameters,
    budget: Duration,
    deadline: Instant,
    seed: u64,
    cancel: CancelFlag,
}

/// Orchestrates one generation request: plan, model, relax, extract, validate.
pub struct LayoutEngine<E: SolverEngine> {
    engine: Arc<E>,
}

impl Default for LayoutEngine<BacktrackingEngine> {
    fn default() -> Self {
        Self::new(BacktrackingEngine::new())
    }
}

impl<E: SolverEngine> Clone for LayoutEngine<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: SolverEngine + 'static> LayoutEngine<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Solves every plate on the blocking pool. Plates run concurrently unless
    /// `concurrent_plates` is off; the first failing plate fails the request
    /// and cancels the plates still running.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<SolveResult> {
        let started = Instant::now();
        let cancel = CancelFlag::new();
        let jobs = prepare(request, started, &cancel)?;

        let mut solved = Vec::with_capacity(jobs.len());
        if request.options.concurrent_plates {
            let mut workers = JoinSet::new();
            for job in jobs {
                let engine = Arc::clone(&self.engine);
                workers.spawn_blocking(move || solve_plate(engine.as_ref(), job));
            }

            let mut failure = None;
            while let Some(joined) = workers.join_next().await {
                let outcome = joined.map_err(task_error).and_then(|plate| plate);
                match outcome {
                    Ok(plate) => solved.push(plate),
                    Err(e) if failure.is_none() => {
                        tracing::warn!("Cancelling remaining plates: {}", e);
                        cancel.cancel();
                        failure = Some(e);
                    }
                    Err(_) => {}
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
            solved.sort_by_key(|(layout, _)| layout.plate_index);
        } else {
            for job in jobs {
                solved.push(join(self.spawn_plate(job)).await??);
            }
        }

        Ok(assemble(solved, started))
    }

    /// Same pipeline on the calling thread, plate after plate.
    pub fn generate_blocking(&self, request: &GenerationRequest) -> Result<SolveResult> {
        let started = Instant::now();
        let solved = prepare(request, started, &CancelFlag::new())?
            .into_iter()
            .map(|job| solve_plate(self.engine.as_ref(), job))
            .collect::<Result<Vec<_>>>()?;
        Ok(assemble(solved, started))
    }

    /// Runs a request in the background; the caller polls or awaits the handle.
    pub fn spawn(&self, request: GenerationRequest) -> JoinHandle<Result<SolveResult>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.generate(&request).await })
    }

    fn spawn_plate(&self, job: PlateJob) -> JoinHandle<Result<(Layout, PlateReport)>> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || solve_plate(engine.as_ref(), job))
    }
}

fn task_error(e: JoinError) -> LayoutError {
    LayoutError::TaskError {
        message: e.to_string(),
    }
}

async fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle.await.map_err(task_error)
}

fn prepare(
    request: &GenerationRequest,
    started: Instant,
    cancel: &CancelFlag,
) -> Result<Vec<PlateJob>> {
    request.manifest.validate()?;
    request.params.validate()?;

    let options = &request.options;
    let plan = CapacityPlanner::new(&request.params, options.max_plates).plan(&request.manifest)?;
    let builder = ConstraintModelBuilder::new(&request.params);

    let budget_end = started + options.timeout;
    let deadline = options.deadline.map_or(budget_end, |d| d.min(budget_end));

    tracing::info!(
        "Generating {} plate(s) of {} with {:?} budget ({} distribution, seed {})",
        plan.num_plates,
        request.params.plate_format,
        options.timeout,
        format!("{:?}", request.params.distribution).to_lowercase(),
        options.seed
    );

    plan.plates
        .into_iter()
        .map(|allocation| {
            Ok(PlateJob {
                model: builder.build(&allocation)?,
                params: request.params.clone(),
                budget: options.timeout,
                deadline,
                seed: options.seed.wrapping_add(allocation.plate_index as u64),
                cancel: cancel.clone(),
                allocation,
            })
        })
        .collect()
}

fn solve_plate<E: SolverEngine + ?Sized>(engine: &E, job: PlateJob) -> Result<(Layout, PlateReport)> {
    let PlateJob {
        model,
        allocation,
        params,
        budget,
        deadline,
        seed,
        cancel,
    } = job;

    let solution = RelaxationController::new(engine, seed)
        .with_cancel(cancel)
        .run(model, budget, Some(deadline))?;
    let mut layout = LayoutExtractor::extract(&solution.model, &allocation, &solution.assignment);
    ConstraintValidator::for_allocation(&params, &allocation).revalidate(&mut layout);

    let unexpected: Vec<&str> = layout
        .violations
        .iter()
        .filter(|v| !solution.relaxed.contains(&v.rule))
        .map(|v| v.rule.name())
        .collect();
    if !unexpected.is_empty() {
        tracing::error!(
            "{}: validator disagrees with the solver on {:?}",
            layout.plate_barcode,
            unexpected
        );
    }

    let report = PlateReport {
        plate_index: layout.plate_index,
        solved_at: solution.solved_at,
        relaxed_constraints: solution.relaxed,
        relaxation_reasons: relaxation_reasons(&solution.attempts),
        attempts: solution.attempts.len(),
        elapsed_ms: solution.elapsed.as_millis() as u64,
    };
    Ok((layout, report))
}

fn assemble(solved: Vec<(Layout, PlateReport)>, started: Instant) -> SolveResult {
    let (layouts, plates): (Vec<Layout>, Vec<PlateReport>) = solved.into_iter().unzip();

    let mut relaxed: Vec<ConstraintKind> = plates
        .iter()
        .flat_map(|p| p.relaxed_constraints.iter().copied())
        .collect();
    relaxed.sort_by_key(|k| std::cmp::Reverse(k.priority()));
    relaxed.dedup();

    let violations = layouts
        .iter()
        .flat_map(|l| l.violations.iter().cloned())
        .collect();

    let (status, message) = if relaxed.is_empty() {
        (SolveStatus::Success, None)
    } else {
        let names: Vec<&str> = relaxed.iter().map(|k| k.name()).collect();
        tracing::warn!("Layout is partial, relaxed: {}", names.join(", "));
        let reasons: Vec<String> = plates
            .iter()
            .flat_map(|p| {
                p.relaxation_reasons
                    .iter()
                    .map(move |r| format!("plate {}: {}", p.plate_index + 1, r.description))
            })
            .collect();
        let mut message = format!("relaxed constraints: {}", names.join(", "));
        if !reasons.is_empty() {
            message.push_str(&format!(" (because {})", reasons.join("; ")));
        }
        (SolveStatus::Partial, Some(message))
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        "Generated {} layout(s) in {} ms ({:?})",
        layouts.len(),
        elapsed_ms,
        status
    );

    SolveResult {
        status,
        layouts,
        violations,
        relaxed_constraints: relaxed,
        plates,
        elapsed_ms,
        generated_at: Utc::now(),
        message,
    }
}
