use crate::fetch::Engine;
use crate::jobs::{EngineSlot, JobError};
use crate::state::{JobStatus, StateManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub ok: bool,
    pub error: Option<String>,
    pub counts: BTreeMap<String, u64>,
}

impl PhaseResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            counts: BTreeMap::new(),
        }
    }

    pub fn with_count(mut self, name: impl Into<String>, value: u64) -> Self {
        self.counts.insert(name.into(), value);
        self
    }
}

/// Shared mutable context handed to every phase
pub struct PhaseContext {
    pub engine: EngineSlot,
    pub state: StateManager,
    /// Free-form job configuration
    pub config: serde_json::Value,
    /// When false, phases must not touch the network
    pub online: bool,
}

impl PhaseContext {
    pub fn new(engine: EngineSlot, state: StateManager, config: serde_json::Value) -> Self {
        Self {
            engine,
            state,
            config,
            online: true,
        }
    }

    /// The live engine, unless the job runs offline
    pub async fn engine(&mut self) -> Result<Arc<dyn Engine>, JobError> {
        if !self.online {
            return Err(JobError::Offline);
        }
        Ok(self.engine.get().await?)
    }
}

/// A named unit of work within a job
#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut PhaseContext) -> PhaseResult;
}

/// Summary of one `PhaseRunner::run` call
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Phases executed by this call, in order
    pub phases_run: Vec<String>,
    pub results: Vec<(String, PhaseResult)>,
    pub failed_phase: Option<String>,
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }
}

/// Runs phases in declared order, resuming where a previous run stopped
#[derive(Default)]
pub struct PhaseRunner {
    phases: Vec<Box<dyn Phase>>,
}

impl PhaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: impl Phase + 'static) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Index of the first phase still to run
    fn resume_index(&self, ctx: &PhaseContext) -> Result<usize, JobError> {
        match ctx.state.phase() {
            None => Ok(0),
            Some(saved) => self
                .phases
                .iter()
                .position(|p| p.name() == saved)
                .ok_or_else(|| JobError::UnknownPhase(saved.to_string())),
        }
    }

    /// Runs the job
    ///
    /// - The saved phase marks where to resume; earlier phases are skipped
    /// - State is saved on entering and after completing each phase
    /// - The first failing phase stops the job with the state left on it
    /// - The job is marked done after the last phase
    pub async fn run(&self, ctx: &mut PhaseContext) -> Result<JobOutcome, JobError> {
        let mut outcome = JobOutcome {
            status: ctx.state.status(),
            phases_run: Vec::new(),
            results: Vec::new(),
            failed_phase: None,
        };

        if ctx.state.is_done() {
            tracing::info!("Job {} is already done", ctx.state.job_id());
            return Ok(outcome);
        }

        let start = self.resume_index(ctx)?;
        if start > 0 {
            tracing::info!(
                "Job {}: skipping {} completed phase(s)",
                ctx.state.job_id(),
                start
            );
        }

        for (index, phase) in self.phases.iter().enumerate().skip(start) {
            let name = phase.name().to_string();
            ctx.state.set_phase(&name);
            ctx.state.save()?;

            tracing::info!("Job {}: running phase {}", ctx.state.job_id(), name);
            let result = phase.run(ctx).await;
            outcome.phases_run.push(name.clone());

            if !result.ok {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("phase {} failed", name));
                tracing::warn!("Job {}: phase {} failed: {}", ctx.state.job_id(), name, error);
                ctx.state.mark_failed(&error)?;
                ctx.engine.close().await;
                outcome.results.push((name.clone(), result));
                outcome.status = ctx.state.status();
                outcome.failed_phase = Some(name);
                return Ok(outcome);
            }

            outcome.results.push((name, result));

            // Completing a phase moves the checkpoint to the next one
            if let Some(next) = self.phases.get(index + 1) {
                ctx.state.set_phase(next.name());
                ctx.state.save()?;
            }
        }

        ctx.state.mark_done()?;
        ctx.engine.close().await;
        tracing::info!("Job {} done", ctx.state.job_id());

        outcome.status = ctx.state.status();
        Ok(outcome)
    }
}
