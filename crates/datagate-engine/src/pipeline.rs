//! Run orchestrator
//!
//! Drives one batch through every stage in order, threading a
//! [`StageOutcome`] between them. A stop, or a missing contract, halts the
//! run; the remaining stages are logged as skipped. The report is assembled
//! once at the end and history is only written for runs that were not
//! blocked.

use chrono::{DateTime, Utc};
use datagate_core::{
    content_hash, derive_run_id, ApprovalResult, Contract, HealthIndicator, LogOutcome,
    PipelineConfig, QualityMetrics, RemediationOutcome, ReportStatus, RowSampler, RunReport,
    Stage, StageError, StageLogEntry, StatsSummary, Verdict,
};
use datagate_registry::{ContractRepository, LineageGraph, ReferenceSource, RepositoryError};
use datagate_store::{BaselineStore, MetricRecord, ProcessedBatch};
use std::sync::Arc;
use std::time::Instant;

use crate::anomaly::{self, RunContext, ROW_COUNT_METRIC};
use crate::drift::{self, ANOMALY_FLAGS_METRIC};
use crate::impact;
use crate::loader::{self, LoadedBatch};
use crate::outcome::StageOutcome;
use crate::profiler;
use crate::remediation::RemediationActuator;
use crate::sanity;
use crate::schema_check::{self, SchemaFindings};
use crate::source::{BatchSource, SourceMetadata};
use crate::trust::{self, TrustInputs};

/// One evaluation request
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub batch_ref: String,
    pub dataset_id: String,

    /// Defaults to a hash of the dataset id and batch content
    pub run_id: Option<String>,

    /// Evaluation time; defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

impl EvaluationRequest {
    pub fn new(batch_ref: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            batch_ref: batch_ref.into(),
            dataset_id: dataset_id.into(),
            run_id: None,
            as_of: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// Data-quality evaluation pipeline
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn BatchSource>,
    contracts: Arc<dyn ContractRepository>,
    store: Arc<dyn BaselineStore>,
    lineage: Arc<dyn LineageGraph>,
    references: Option<Arc<dyn ReferenceSource>>,
    actuator: RemediationActuator,
}

/// Mutable state of one run
struct RunState {
    report: RunReport,
    now: DateTime<Utc>,
    contract: Result<Contract, RepositoryError>,
    metadata: Option<SourceMetadata>,
    needs_sampling: bool,
    loaded: Option<LoadedBatch>,
    schema: Option<SchemaFindings>,
    quality: Option<QualityMetrics>,
    contract_missing: bool,

    /// Why later stages are skipped
    halted: Option<String>,
}

impl RunState {
    fn active_contract(&self) -> Option<&Contract> {
        self.contract.as_ref().ok()
    }

    /// Record a stage outcome: log entry, warnings, errors and verdict
    fn settle<T>(
        &mut self,
        stage: Stage,
        started: Instant,
        outcome: StageOutcome<T>,
        summarize: impl FnOnce(&T) -> String,
    ) -> Option<T> {
        let log_outcome = outcome.log_outcome();
        self.report.verdict = self.report.verdict.max(outcome.verdict());

        let (payload, summary) = match outcome {
            StageOutcome::Continue(payload) => {
                let summary = summarize(&payload);
                (Some(payload), summary)
            }
            StageOutcome::Warn(payload, reasons) => {
                let summary = summarize(&payload);
                self.report.warnings.extend(reasons);
                (Some(payload), summary)
            }
            StageOutcome::Stop(payload, err) => {
                tracing::warn!(stage = %stage, error = %err, "run stopped");
                let summary = match &payload {
                    Some(p) => format!("{}; {}", err, summarize(p)),
                    None => err.to_string(),
                };
                // Contract violations are listed one by one by the schema stage
                if !matches!(err, StageError::ContractViolation { .. }) {
                    self.report.critical_errors.push(err.to_string());
                }
                self.halted = Some(format!("run stopped at {}", stage));
                (payload, summary)
            }
        };

        tracing::info!(stage = %stage, outcome = %log_outcome, "{}", summary);
        self.report.execution_log.push(StageLogEntry {
            stage,
            outcome: log_outcome,
            duration_ms: started.elapsed().as_millis() as u64,
            summary,
        });
        payload
    }

    fn run_context(&self) -> RunContext<'_> {
        RunContext {
            dataset_id: &self.report.dataset_id,
            run_id: &self.report.run_id,
            as_of: self.now,
        }
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn BatchSource>,
        contracts: Arc<dyn ContractRepository>,
        store: Arc<dyn BaselineStore>,
        lineage: Arc<dyn LineageGraph>,
    ) -> Self {
        Self {
            config,
            source,
            actuator: RemediationActuator::new(contracts.clone()),
            contracts,
            store,
            lineage,
            references: None,
        }
    }

    /// Enable referential key checks
    pub fn with_references(mut self, references: Arc<dyn ReferenceSource>) -> Self {
        self.references = Some(references);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Evaluate a batch of a dataset
    pub fn evaluate(&self, batch_ref: &str, dataset_id: &str) -> RunReport {
        self.evaluate_request(&EvaluationRequest::new(batch_ref, dataset_id))
    }

    /// Approve a contract document, applying the remediation safety gates
    pub fn approve_contract(&self, dataset_id: &str, content: &str) -> ApprovalResult {
        self.actuator.approve(dataset_id, content)
    }

    /// Evaluate a batch with an explicit run id or evaluation time
    pub fn evaluate_request(&self, request: &EvaluationRequest) -> RunReport {
        let now = request.as_of.unwrap_or_else(Utc::now);
        let dataset_id = request.dataset_id.as_str();

        let metadata = self.source.describe(&request.batch_ref);
        let run_id = request.run_id.clone().unwrap_or_else(|| {
            let hash = match &metadata {
                Ok(meta) => meta.content_hash.clone(),
                Err(_) => content_hash(request.batch_ref.as_bytes()),
            };
            derive_run_id(dataset_id, &hash)
        });

        let span = tracing::info_span!("evaluate", dataset = %dataset_id, run = %run_id);
        let _enter = span.enter();

        let mut state = RunState {
            report: RunReport::new(request.batch_ref.clone(), dataset_id, run_id),
            now,
            contract: self.contracts.get(dataset_id),
            metadata: None,
            needs_sampling: false,
            loaded: None,
            schema: None,
            quality: None,
            contract_missing: false,
            halted: None,
        };
        state.report.timestamp = now.to_rfc3339();

        let mut metadata = Some(metadata);
        let mut stage = Some(Stage::Sanity);
        while let Some(current) = stage {
            if let Some(reason) = &state.halted {
                let entry = StageLogEntry::skipped(current, reason.clone());
                state.report.execution_log.push(entry);
                stage = current.next();
                continue;
            }

            let started = Instant::now();
            match current {
                Stage::Sanity => {
                    let described = metadata.take().unwrap_or_else(|| {
                        Err(crate::source::SourceError::NotFound(request.batch_ref.clone()))
                    });
                    self.run_sanity(&mut state, described, started);
                }
                Stage::Load => self.run_load(&mut state, &request.batch_ref, started),
                Stage::Schema => self.run_schema(&mut state, started),
                Stage::Profile => self.run_profile(&mut state, started),
                Stage::Anomaly => self.run_anomaly(&mut state, started),
                Stage::Drift => self.run_drift(&mut state, started),
                Stage::Impact => self.run_impact(&mut state, started),
                Stage::Trust => self.run_trust(&mut state, started),
                Stage::Remediate => self.run_remediation(&mut state, started),
            }
            stage = current.next();
        }

        self.finalize(state)
    }

    fn run_sanity(
        &self,
        state: &mut RunState,
        described: Result<SourceMetadata, crate::source::SourceError>,
        started: Instant,
    ) {
        let metadata = match described {
            Ok(metadata) => metadata,
            Err(e) => {
                let outcome: StageOutcome<sanity::SanityReport> =
                    StageOutcome::Stop(None, StageError::input(e.to_string()));
                state.settle(Stage::Sanity, started, outcome, |r| r.summary());
                return;
            }
        };

        let window = self.config.sanity.duplicate_window;
        let (hashes, hash_error) = if window == 0 {
            (Vec::new(), None)
        } else {
            match self.store.recent_hashes(&state.report.dataset_id, window) {
                Ok(hashes) => (hashes, None),
                Err(e) => (Vec::new(), Some(format!("duplicate check skipped: {}", e))),
            }
        };

        let sla = state
            .active_contract()
            .and_then(|c| c.constraints.freshness_sla_hours)
            .or(self.config.sanity.freshness_sla_hours);

        let mut outcome = sanity::check(
            &metadata,
            &hashes,
            sla,
            &self.config.sanity,
            &self.config.sampling,
            state.now,
        );
        if let Some(reason) = hash_error {
            outcome = outcome.with_warning(reason);
        }

        if let Some(report) = state.settle(Stage::Sanity, started, outcome, |r| r.summary()) {
            state.needs_sampling = report.needs_sampling;
        }
        state.metadata = Some(metadata);
    }

    fn run_load(&self, state: &mut RunState, batch_ref: &str, started: Instant) {
        let mut sampler = if state.needs_sampling {
            RowSampler::for_run(self.config.sampling.sample_rate, &state.report.run_id)
        } else {
            RowSampler::full()
        };

        let outcome = loader::load(self.source.as_ref(), batch_ref, &mut sampler);
        state.loaded = state.settle(Stage::Load, started, outcome, LoadedBatch::summary);
    }

    fn run_schema(&self, state: &mut RunState, started: Instant) {
        let Some(loaded) = &state.loaded else {
            return;
        };

        let contract = match &state.contract {
            Ok(contract) => contract,
            Err(RepositoryError::NotFound(_)) => {
                let draft = schema_check::draft_contract(&state.report.dataset_id, &loaded.batch);
                let summary = format!(
                    "no contract for dataset; drafted version {} with {} column(s) for approval",
                    draft.version,
                    draft.columns.len()
                );
                tracing::info!(stage = %Stage::Schema, "{}", summary);
                state.report.execution_log.push(StageLogEntry {
                    stage: Stage::Schema,
                    outcome: LogOutcome::ContractMissing,
                    duration_ms: started.elapsed().as_millis() as u64,
                    summary,
                });
                state.report.inferred_contract = Some(draft);
                state.contract_missing = true;
                state.halted = Some("contract missing; awaiting approval".to_string());
                return;
            }
            Err(e) => {
                let outcome: StageOutcome<SchemaFindings> = StageOutcome::Stop(
                    None,
                    StageError::input(format!("contract repository: {}", e)),
                );
                state.settle(Stage::Schema, started, outcome, SchemaFindings::summary);
                return;
            }
        };

        let outcome = schema_check::validate(contract, &loaded.batch, self.references.as_deref());
        if let StageOutcome::Stop(Some(findings), _) = &outcome {
            for violation in &findings.violations {
                if violation.is_critical() {
                    state.report.critical_errors.push(violation.describe());
                } else {
                    state.report.warnings.push(violation.describe());
                }
            }
        }

        state.report.active_contract = Some(contract.clone());
        let findings = state.settle(Stage::Schema, started, outcome, SchemaFindings::summary);
        if let Some(findings) = &findings {
            state.report.violations = findings.violations.clone();
        }
        state.schema = findings;
    }

    fn run_profile(&self, state: &mut RunState, started: Instant) {
        let Some(loaded) = &state.loaded else {
            return;
        };

        let stats = profiler::profile(&loaded.batch);
        let keys = profiler::key_columns(state.active_contract());
        let quality = profiler::quality_metrics(&loaded.batch, &keys);

        let outcome: StageOutcome<(StatsSummary, QualityMetrics)> =
            StageOutcome::Continue((stats, quality));
        if let Some((stats, quality)) = state.settle(Stage::Profile, started, outcome, |(s, q)| {
            format!(
                "{} numeric column(s) profiled; completeness {:.1}, uniqueness {:.1}, {} duplicate row(s)",
                s.len(),
                q.completeness,
                q.uniqueness,
                q.duplicate_rows
            )
        }) {
            state.report.stats_summary = stats;
            state.report.quality_metrics = Some(quality.clone());
            state.quality = Some(quality);
        }
    }

    fn run_anomaly(&self, state: &mut RunState, started: Instant) {
        let Some(loaded) = &state.loaded else {
            return;
        };

        let outcome = anomaly::detect(
            &loaded.batch,
            &state.report.stats_summary,
            state.run_context(),
            self.store.as_ref(),
            &self.config.anomaly,
        );
        state.report.anomalies = state.settle(Stage::Anomaly, started, outcome, |f| {
            let seasonal = f
                .seasonal
                .as_ref()
                .map(|s| match s.sigma {
                    Some(sigma) => format!(
                        "{} {} at {:.1} sigma (threshold {})",
                        s.metric, s.bucket, sigma, self.config.anomaly.seasonal_sigma
                    ),
                    None => format!(
                        "{} {} {} ({}/{} samples)",
                        s.metric, s.bucket, s.status, s.sample_count, self.config.anomaly.min_bucket_samples
                    ),
                })
                .unwrap_or_else(|| "seasonal check unavailable".to_string());
            format!(
                "{} column(s) with outliers, {} quarantine candidate(s); {}",
                f.outliers.len(),
                f.quarantine_rows().len(),
                seasonal
            )
        });
    }

    fn run_drift(&self, state: &mut RunState, started: Instant) {
        let Some(loaded) = &state.loaded else {
            return;
        };

        let outcome = drift::detect(
            &loaded.batch,
            &state.report.stats_summary,
            state.run_context(),
            self.store.as_ref(),
            &self.config.drift,
        );
        state.report.drift = state.settle(Stage::Drift, started, outcome, |f| {
            format!(
                "{} over {} run(s); {} metric(s) beyond {:.0}%",
                f.status,
                f.history_runs,
                f.warnings.len(),
                self.config.drift.threshold * 100.0
            )
        });
    }

    fn run_impact(&self, state: &mut RunState, started: Instant) {
        let outcome = impact::analyze(
            &state.report.dataset_id,
            state.active_contract(),
            self.lineage.as_ref(),
        );
        state.report.table_priority = state.settle(Stage::Impact, started, outcome, |p| {
            format!(
                "tier {} ({}); {} downstream dataset(s)",
                p.tier,
                p.criticality,
                p.blast_radius.len()
            )
        });
    }

    fn run_trust(&self, state: &mut RunState, started: Instant) {
        let quality = state.quality.clone().unwrap_or_default();
        let drift = state.report.drift.clone().unwrap_or_default();
        let current_flags = state.report.anomalies.as_ref().map_or(0, |a| a.flag_count())
            + drift.flag_count();

        let inputs = TrustInputs {
            verdict: state.report.verdict,
            quality: &quality,
            current_flags,
            flag_window: drift.flag_window,
            flagged_runs: drift.flagged_runs,
            priority: state.report.table_priority.as_ref().map(|p| p.tier),
        };
        let outcome = trust::aggregate(inputs, &self.config.trust);
        state.report.health_indicator = state.settle(Stage::Trust, started, outcome, |h| {
            format!("score {:.1} ({:?}); safe_to_use={}", h.score, h.status, h.safe_to_use)
        });
    }

    fn run_remediation(&self, state: &mut RunState, started: Instant) {
        let proposal = match (&state.schema, &state.loaded, &state.contract) {
            (Some(findings), Some(loaded), Ok(contract)) if findings.evolution().next().is_some() => {
                if self.config.remediation.enabled {
                    RemediationActuator::propose(contract, findings, &loaded.batch)
                        .ok_or("no applicable schema evolution")
                } else {
                    Err("remediation disabled")
                }
            }
            _ => Err("no schema evolution detected"),
        };
        let proposal = match proposal {
            Ok(proposal) => proposal,
            Err(reason) => {
                state
                    .report
                    .execution_log
                    .push(StageLogEntry::skipped(Stage::Remediate, reason));
                return;
            }
        };

        let outcome = self
            .actuator
            .remediate(proposal, self.config.remediation.require_approval);
        state.report.remediation = state.settle(Stage::Remediate, started, outcome, |r| match r {
            RemediationOutcome::PendingApproval { proposal } => {
                format!("version {} proposed, pending approval", proposal.version)
            }
            RemediationOutcome::Applied { version, backup } => {
                format!("version {} applied; prior version archived at {}", version, backup)
            }
            RemediationOutcome::Rejected { gate, reason } => {
                format!("proposal rejected at gate {}: {}", gate, reason)
            }
        });
    }

    /// Assemble the final report and persist history for accepted runs
    fn finalize(&self, mut state: RunState) -> RunReport {
        let blocked = state.report.verdict == Verdict::Blocked;

        state.report.status = if state.contract_missing {
            ReportStatus::ContractMissing
        } else {
            ReportStatus::from(state.report.verdict)
        };

        if state.report.table_priority.is_none() {
            state.report.table_priority = Some(impact::table_priority(
                &state.report.dataset_id,
                state.active_contract(),
                self.lineage.as_ref(),
            ));
        }

        if blocked {
            state.report.health_indicator = Some(HealthIndicator::blocked());
        }

        if let Some(anomalies) = &state.report.anomalies {
            state.report.quarantine_candidates = anomalies
                .quarantine_rows()
                .into_iter()
                .take(self.config.report.max_quarantine)
                .collect();
        }

        if !blocked && !state.contract_missing {
            if let Err(e) = self.persist(&state) {
                tracing::warn!(error = %e, "failed to record run history");
                state
                    .report
                    .warnings
                    .push(format!("run history not recorded: {}", e));
            }
        }

        tracing::info!(
            status = %state.report.status,
            verdict = %state.report.verdict,
            critical = state.report.critical_errors.len(),
            warnings = state.report.warnings.len(),
            "evaluation finished"
        );
        state.report
    }

    fn persist(&self, state: &RunState) -> Result<(), datagate_store::StoreError> {
        let (Some(loaded), Some(metadata)) = (&state.loaded, &state.metadata) else {
            return Ok(());
        };
        let report = &state.report;
        let bucket = self.config.anomaly.bucket;
        let record = |metric: &str, value: f64| {
            MetricRecord::new(&report.dataset_id, &report.run_id, state.now, metric, value, bucket)
        };

        let flags = report.anomalies.as_ref().map_or(0, |a| a.flag_count())
            + report.drift.as_ref().map_or(0, |d| d.flag_count());

        let mut records = vec![record(ROW_COUNT_METRIC, loaded.batch.source_rows() as f64)];
        for (column, profile) in &report.stats_summary {
            if profile.mean.is_finite() {
                records.push(record(&drift::mean_metric(column), profile.mean));
            } else {
                tracing::warn!(column = %column, mean = profile.mean, "non-finite column mean not recorded");
            }
        }
        records.push(record(ANOMALY_FLAGS_METRIC, flags as f64));

        self.store.append_metrics(&records)?;
        self.store.append_processed(ProcessedBatch {
            dataset_id: report.dataset_id.clone(),
            run_id: report.run_id.clone(),
            content_hash: metadata.content_hash.clone(),
            timestamp: state.now,
        })?;

        tracing::debug!(records = records.len(), "run history recorded");
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("references", &self.references.is_some())
            .finish_non_exhaustive()
    }
}
