//! Run orchestration across sources
//!
//! The orchestrator validates the configuration, allocates a run id and then
//! runs every selected source in turn:
//! - Builds the source's engine through an [`EngineFactory`]
//! - Runs the pipeline in its own task so a panic stays contained
//! - Writes the source's artifacts under `<results_root>/<run_id>/<source_id>/`
//! - Folds the source's stats into the [`RunReport`]
//!
//! A failing source is recorded in its report and never stops the run.

mod run_id;

pub use run_id::new_run_id;

use crate::config::{validate, DedupeScope, RunConfig, SourceConfig};
use crate::fetch::{DefaultEngineFactory, EngineFactory};
use crate::filter::DedupeStore;
use crate::output::{
    diagnose, write_json, write_markdown_report, RunMeta, RunReport, SourceArtifacts, SourceMeta,
    SourceReport,
};
use crate::pipeline::{PipelineOutput, PipelineStage};
use crate::{ConfigError, HarrowError};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Drives one run over the configured sources
pub struct Orchestrator {
    config: RunConfig,
    factory: Arc<dyn EngineFactory>,
    config_hash: Option<String>,
    config_path: Option<String>,
    only: Vec<String>,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            factory: Arc::new(DefaultEngineFactory),
            config_hash: None,
            config_path: None,
            only: Vec::new(),
            dry_run: false,
        }
    }

    /// Replaces the factory used to build each source's engine
    pub fn with_engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn with_config_path(mut self, path: &Path) -> Self {
        self.config_path = Some(path.display().to_string());
        self
    }

    /// Restricts the run to the given source ids; empty means all
    pub fn source_filter(mut self, ids: Vec<String>) -> Self {
        self.only = ids;
        self
    }

    /// Validate and write run metadata without fetching anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Enabled sources matching the filter, in configuration order
    pub fn selected_sources(&self) -> Result<Vec<SourceConfig>, ConfigError> {
        if let Some(unknown) = self.only.iter().find(|id| self.config.source(id).is_none()) {
            return Err(ConfigError::UnknownSource(unknown.clone()));
        }

        Ok(self
            .config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| self.only.is_empty() || self.only.contains(&s.id))
            .cloned()
            .collect())
    }

    /// Runs every selected source and writes the run report
    ///
    /// Only configuration and run-level I/O problems are returned as errors;
    /// source failures end up in the report.
    pub async fn run(&self) -> Result<RunReport, HarrowError> {
        for warning in validate(&self.config).into_result()? {
            tracing::warn!("Config warning: {}", warning);
        }
        let sources = self.selected_sources()?;

        let started_at = Utc::now();
        let run_id = new_run_id(started_at);
        let run_dir = Path::new(&self.config.run.results_root).join(&run_id);
        std::fs::create_dir_all(&run_dir)?;

        tracing::info!(
            "Starting run {} with {} source(s){}",
            run_id,
            sources.len(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        let mut meta = RunMeta::new(&run_id, started_at);
        meta.config_path = self.config_path.clone();
        meta.config_hash = self.config_hash.clone();
        meta.dry_run = self.dry_run;
        meta.sources = sources.iter().map(|s| s.id.clone()).collect();

        let mut report = RunReport::new(&run_id, started_at);
        report.config_hash = self.config_hash.clone();
        report.dry_run = self.dry_run;

        if !self.dry_run {
            let shared = Arc::new(DedupeStore::new());

            for source in sources {
                let dedupe = match self.config.run.dedupe_scope {
                    DedupeScope::Run => Arc::clone(&shared),
                    DedupeScope::Source => Arc::new(DedupeStore::new()),
                };
                let source_report = self.run_isolated(source, dedupe, &run_dir, &run_id).await;
                report.add_source(source_report);
            }
        }

        let finished_at = Utc::now();
        report.finish(finished_at);
        meta.finished_at = Some(finished_at);

        write_json(&run_dir.join("run_meta.json"), &meta)?;
        write_json(&run_dir.join("report.json"), &report)?;
        write_markdown_report(&report, &run_dir.join("report.md"))?;

        tracing::info!(
            "Run {} finished: {}/{} source(s) ok, {} item(s) saved",
            run_id,
            report.sources_ok,
            report.sources_total,
            report.totals.items_saved
        );

        Ok(report)
    }

    /// Runs one source in its own task, converting a panic into a failed report
    async fn run_isolated(
        &self,
        source: SourceConfig,
        dedupe: Arc<DedupeStore>,
        run_dir: &Path,
        run_id: &str,
    ) -> SourceReport {
        let id = source.id.clone();
        let engine = source.engine.kind.clone();
        let started = Instant::now();

        let task = tokio::spawn(run_source(
            source,
            Arc::clone(&self.factory),
            dedupe,
            run_dir.to_path_buf(),
            run_id.to_string(),
        ));

        match task.await {
            Ok(report) => report,
            Err(e) => {
                let message = if e.is_panic() {
                    "source task panicked".to_string()
                } else {
                    format!("source task aborted: {}", e)
                };
                tracing::error!("Source {}: {}", id, message);
                let mut report = SourceReport::failed(id, engine, message);
                report.elapsed_ms = elapsed_ms(started);
                report
            }
        }
    }
}

/// Report for a pipeline that failed after fetching; its dumps are still written
fn failed_with_output(
    artifacts: &SourceArtifacts,
    id: &str,
    engine_kind: &str,
    output: &PipelineOutput,
    message: String,
) -> SourceReport {
    let mut report =
        SourceReport::from_stats(id, engine_kind, &output.discovery, &output.stats, 0);
    report.ok = false;
    report.error = Some(match artifacts.write_output(output) {
        Ok(_) => message,
        Err(e) => format!("{}; failed to write artifacts: {}", message, e),
    });
    report.diagnosis = diagnose(&report);
    report
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builds the engine, runs the pipeline and writes the source's artifacts
async fn run_source(
    source: SourceConfig,
    factory: Arc<dyn EngineFactory>,
    dedupe: Arc<DedupeStore>,
    run_dir: PathBuf,
    run_id: String,
) -> SourceReport {
    let started = Instant::now();
    let started_at = Utc::now();
    let id = source.id.clone();
    let engine_kind = source.engine.kind.clone();

    tracing::info!("Source {}: starting with {} engine", id, engine_kind);

    let artifacts = match SourceArtifacts::create(&run_dir, &id, source.storage.format) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            let mut report = SourceReport::failed(&id, &engine_kind, e.to_string());
            report.elapsed_ms = elapsed_ms(started);
            return report;
        }
    };

    let mut discovery = String::new();
    let mut report = match factory.build(&source).await {
        Err(e) => {
            tracing::error!("Source {}: engine unavailable: {}", id, e);
            SourceReport::failed(&id, &engine_kind, e.to_string())
        }
        Ok(engine) => {
            let outcome = match PipelineStage::new(source.clone(), Arc::clone(&engine), dedupe) {
                Ok(stage) => stage.run().await,
                Err(e) => Err(e),
            };
            engine.close().await;

            match outcome {
                Ok(output) => {
                    discovery = output.discovery.clone();
                    match artifacts.write_output(&output) {
                        Ok(saved) => SourceReport::from_stats(
                            &id,
                            &engine_kind,
                            &output.discovery,
                            &output.stats,
                            saved,
                        ),
                        Err(e) => {
                            let mut report = SourceReport::from_stats(
                                &id,
                                &engine_kind,
                                &output.discovery,
                                &output.stats,
                                0,
                            );
                            report.ok = false;
                            report.error = Some(format!("failed to write artifacts: {}", e));
                            report
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Source {}: {}", id, e);
                    let message = e.to_string();
                    match e.into_partial_output() {
                        Some(partial) => {
                            discovery = partial.discovery.clone();
                            failed_with_output(&artifacts, &id, &engine_kind, &partial, message)
                        }
                        None => SourceReport::failed(&id, &engine_kind, message),
                    }
                }
            }
        }
    };

    if report.elapsed_ms == 0 {
        report.elapsed_ms = elapsed_ms(started);
    }

    let meta = SourceMeta {
        source_id: id.clone(),
        run_id,
        engine: engine_kind,
        discovery,
        format: source.storage.format.extension().to_string(),
        started_at,
        finished_at: Utc::now(),
        ok: report.ok,
        error: report.error.clone(),
        config: serde_json::to_value(&source).unwrap_or(serde_json::Value::Null),
    };
    if let Err(e) = artifacts.write_meta(&meta) {
        tracing::warn!("Source {}: failed to write source_meta.json: {}", id, e);
    }

    tracing::info!(
        "Source {}: {} in {} ms, {} item(s) saved",
        id,
        if report.ok { "ok" } else { "failed" },
        report.elapsed_ms,
        report.items_saved
    );

    report
}
