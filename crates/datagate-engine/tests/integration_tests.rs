//! End-to-end pipeline runs with in-memory and file-backed collaborators

use chrono::{DateTime, Duration, TimeZone, Utc};
use datagate_core::{
    ColumnSpec, ConstraintSet, Contract, IssueCode, LogOutcome, LogicalType, PipelineConfig,
    RemediationOutcome, ReportStatus, Severity, Stage, Verdict,
};
use datagate_engine::{
    EvaluationRequest, FileBatchSource, InMemoryBatchSource, Pipeline, RemediationActuator,
};
use datagate_registry::{
    ContractRepository, FileContractRepository, InMemoryContractRepository, InMemoryLineage,
};
use datagate_store::{InMemoryBaselineStore, JsonlBaselineStore};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};

struct Harness {
    source: InMemoryBatchSource,
    contracts: InMemoryContractRepository,
    store: InMemoryBaselineStore,
    pipeline: Pipeline,
}

fn harness(config: PipelineConfig, contracts: Vec<Contract>) -> Harness {
    let source = InMemoryBatchSource::new();
    let repo = InMemoryContractRepository::with_contracts(contracts);
    let store = InMemoryBaselineStore::new();
    let pipeline = Pipeline::new(
        config,
        Arc::new(source.clone()),
        Arc::new(repo.clone()),
        Arc::new(store.clone()),
        Arc::new(InMemoryLineage::new()),
    );
    Harness {
        source,
        contracts: repo,
        store,
        pipeline,
    }
}

fn no_duplicate_check() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.sanity.duplicate_window = 0;
    config
}

/// transaction_id unique and not null, amount >= 0.01 and not null,
/// category at most 5% null (warning)
fn transactions_contract() -> Contract {
    Contract::new(
        "transactions",
        1,
        vec![
            ColumnSpec::new("transaction_id", LogicalType::String, Severity::Critical)
                .with_constraints(ConstraintSet::new().not_null().unique()),
            ColumnSpec::new("amount", LogicalType::Float, Severity::Critical)
                .with_constraints(ConstraintSet::new().not_null().min(0.01)),
            ColumnSpec::new("category", LogicalType::String, Severity::Warning)
                .with_constraints(ConstraintSet::new().nullable_max_pct(5.0)),
        ],
    )
}

/// 1000 rows; the first `null_categories` rows have no category
fn transactions_csv(null_categories: usize, with_id: bool) -> String {
    let mut csv = if with_id {
        String::from("transaction_id,amount,category\n")
    } else {
        String::from("amount,category\n")
    };
    let categories = ["books", "games", "music"];
    for i in 0..1000 {
        let category = if i < null_categories {
            ""
        } else {
            categories[i % categories.len()]
        };
        let amount = 0.5 + (i % 100) as f64;
        if with_id {
            csv.push_str(&format!("tx-{},{:.2},{}\n", i, amount, category));
        } else {
            csv.push_str(&format!("{:.2},{}\n", amount, category));
        }
    }
    csv
}

// ============================================================================
// Verdicts
// ============================================================================

#[test]
fn null_rate_over_limit_passes_with_one_warning() {
    let h = harness(PipelineConfig::default(), vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(55, true), None);

    let report = h.pipeline.evaluate("tx.csv", "transactions");

    assert_eq!(report.status, ReportStatus::PassWithWarnings);
    assert_eq!(report.verdict, Verdict::Warning);
    assert!(report.critical_errors.is_empty());
    assert_eq!(report.warnings.len(), 1, "warnings: {:?}", report.warnings);
    assert!(report.warnings[0].contains("category"));
    assert!(report.warnings[0].contains("5.5%"));

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].issue, IssueCode::NullRate);
    assert_eq!(report.executed_stages().len(), Stage::ALL.len() - 1);
    assert_eq!(
        report.log_entry(Stage::Remediate).map(|e| e.outcome),
        Some(LogOutcome::Skipped)
    );
}

#[test]
fn missing_critical_column_fails_at_schema() {
    let h = harness(PipelineConfig::default(), vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(0, false), None);

    let report = h.pipeline.evaluate("tx.csv", "transactions");

    assert_eq!(report.status, ReportStatus::Fail);
    assert!(report.is_failure());
    assert_eq!(report.critical_errors.len(), 1);

    let missing: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.issue == IssueCode::Missing)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].column, "transaction_id");
    assert_eq!(missing[0].severity, Severity::Critical);

    assert_eq!(
        report.executed_stages(),
        vec![Stage::Sanity, Stage::Load, Stage::Schema]
    );
    assert_eq!(report.execution_log.len(), Stage::ALL.len());
    assert_eq!(
        report.log_entry(Stage::Schema).map(|e| e.outcome),
        Some(LogOutcome::CriticalStop)
    );

    // Blocked runs are scored as unusable and leave no history
    let health = report.health_indicator.unwrap();
    assert!(!health.safe_to_use);
    assert_eq!(health.score, 0.0);
    assert_eq!(h.store.metric_count(), 0);
    assert_eq!(h.store.processed_count(), 0);
}

#[test]
fn warning_only_contract_never_fails() {
    let contract = Contract::new(
        "events",
        1,
        vec![
            ColumnSpec::new("id", LogicalType::Int, Severity::Warning)
                .with_constraints(ConstraintSet::new().unique().max(2.0)),
            ColumnSpec::new("kind", LogicalType::Bool, Severity::Warning),
            ColumnSpec::new("country", LogicalType::String, Severity::Warning)
                .with_constraints(ConstraintSet::new().not_null()),
        ],
    );
    let h = harness(PipelineConfig::default(), vec![contract]);
    h.source
        .insert("events.csv", "id,kind,extra\n1,click,a\n1,view,b\n3,,c\n", None);

    let report = h.pipeline.evaluate("events.csv", "events");

    assert_eq!(report.status, ReportStatus::PassWithWarnings);
    assert!(report.critical_errors.is_empty());
    let issues: Vec<IssueCode> = report.violations.iter().map(|v| v.issue).collect();
    assert!(issues.contains(&IssueCode::Duplicate));
    assert!(issues.contains(&IssueCode::AboveMax));
    assert!(issues.contains(&IssueCode::TypeMismatch));
    assert!(issues.contains(&IssueCode::Missing));
    assert!(issues.contains(&IssueCode::Extra));
}

#[test]
fn clean_run_scores_full_trust() {
    let h = harness(PipelineConfig::default(), vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(0, true), None);

    let report = h.pipeline.evaluate("tx.csv", "transactions");

    assert_eq!(report.status, ReportStatus::Pass);
    for stage in [Stage::Anomaly, Stage::Drift] {
        let summary = &report.log_entry(stage).unwrap().summary;
        assert!(summary.contains("NO_BASELINE"), "{}: {}", stage, summary);
    }
    let health = report.health_indicator.unwrap();
    assert!((health.score - 100.0).abs() < 1e-9);
    assert!(health.safe_to_use);
    assert!(report.quarantine_candidates.is_empty());

    // Accepted runs leave row count, column means and flag count behind
    assert_eq!(h.store.metric_count(), 3);
    assert_eq!(h.store.processed_count(), 1);
}

#[test]
fn duplicate_batch_is_blocked() {
    let h = harness(PipelineConfig::default(), vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(0, true), None);

    assert_eq!(h.pipeline.evaluate("tx.csv", "transactions").status, ReportStatus::Pass);

    let replay = h.pipeline.evaluate("tx.csv", "transactions");
    assert_eq!(replay.status, ReportStatus::Fail);
    assert!(replay.critical_errors[0].contains("duplicate batch"));
    assert_eq!(replay.executed_stages(), vec![Stage::Sanity]);
}

#[test]
fn unreadable_batch_is_an_input_error() {
    let h = harness(PipelineConfig::default(), vec![transactions_contract()]);

    let report = h.pipeline.evaluate("nowhere.csv", "transactions");
    assert_eq!(report.status, ReportStatus::Fail);
    assert!(report.critical_errors[0].starts_with("Input error"));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn same_batch_twice_gives_same_findings() {
    let h = harness(no_duplicate_check(), vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(55, true), None);

    let first = h.pipeline.evaluate("tx.csv", "transactions");
    let second = h.pipeline.evaluate("tx.csv", "transactions");

    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.violations, second.violations);
    assert_eq!(first.stats_summary, second.stats_summary);
    assert_eq!(first.quality_metrics, second.quality_metrics);
}

#[test]
fn sampled_batch_twice_gives_same_findings() {
    let mut config = no_duplicate_check();
    config.sampling.threshold_bytes = 1;
    config.sampling.sample_rate = 0.5;
    let h = harness(config, vec![transactions_contract()]);
    h.source.insert("tx.csv", transactions_csv(55, true), None);

    let first = h.pipeline.evaluate("tx.csv", "transactions");
    let second = h.pipeline.evaluate("tx.csv", "transactions");

    for report in [&first, &second] {
        let load = report.log_entry(Stage::Load).unwrap();
        assert!(load.summary.contains("sampled=true"), "{}", load.summary);
        assert!(!load.summary.contains("rows_loaded=1000 "), "{}", load.summary);
    }
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.execution_log[1].summary, second.execution_log[1].summary);
    assert_eq!(first.violations, second.violations);
    assert_eq!(first.stats_summary, second.stats_summary);
    assert_eq!(first.quality_metrics, second.quality_metrics);
}

// ============================================================================
// Seasonality
// ============================================================================

fn day_rows(weekday: usize, week: usize) -> usize {
    const BASE: [usize; 6] = [1000, 900, 800, 700, 600, 400];
    const JITTER: [i64; 8] = [-30, -20, -10, 0, 5, 10, 20, 30];
    (BASE[weekday] as i64 + JITTER[week]) as usize
}

fn daily_csv(rows: usize, day: &str) -> String {
    let mut csv = String::from("id,day\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{}\n", i, day));
    }
    csv
}

/// Eight weeks of Monday to Saturday runs, starting Monday 2024-04-01
fn seasonal_harness() -> (Harness, DateTime<Utc>) {
    let contract = Contract::new(
        "sales",
        1,
        vec![
            ColumnSpec::new("id", LogicalType::Int, Severity::Critical),
            ColumnSpec::new("day", LogicalType::Date, Severity::Critical),
        ],
    );
    let h = harness(PipelineConfig::default(), vec![contract]);
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 6, 0, 0).unwrap();

    for week in 0..8 {
        for weekday in 0..6 {
            let at = start + Duration::weeks(week as i64) + Duration::days(weekday as i64);
            let day = at.format("%Y-%m-%d").to_string();
            let batch_ref = format!("sales-{}.csv", day);
            h.source.insert(&batch_ref, daily_csv(day_rows(weekday, week), &day), None);

            let report = h
                .pipeline
                .evaluate_request(&EvaluationRequest::new(&batch_ref, "sales").as_of(at));
            assert_ne!(report.status, ReportStatus::Fail, "{}: {:?}", day, report.critical_errors);
        }
    }

    // Saturday of the ninth week
    let saturday = start + Duration::weeks(8) + Duration::days(5);
    (h, saturday)
}

fn saturday_run(h: &Harness, saturday: DateTime<Utc>, rows: usize) -> datagate_core::RunReport {
    let day = saturday.format("%Y-%m-%d").to_string();
    let batch_ref = format!("sales-{}-{}.csv", day, rows);
    h.source.insert(&batch_ref, daily_csv(rows, &day), None);
    h.pipeline
        .evaluate_request(&EvaluationRequest::new(&batch_ref, "sales").as_of(saturday))
}

#[test]
fn typical_saturday_volume_is_not_anomalous() {
    let (h, saturday) = seasonal_harness();
    let report = saturday_run(&h, saturday, 410);

    let seasonal = report.anomalies.unwrap().seasonal.unwrap();
    assert_eq!(seasonal.bucket, "day_of_week:5");
    assert_eq!(seasonal.sample_count, 8);
    assert!(!seasonal.anomalous, "{:?}", seasonal);
}

#[test]
fn weekday_volume_on_saturday_is_anomalous() {
    let (h, saturday) = seasonal_harness();
    let report = saturday_run(&h, saturday, 1000);

    let seasonal = report.anomalies.unwrap().seasonal.unwrap();
    assert!(seasonal.anomalous, "{:?}", seasonal);
    assert_eq!(report.verdict, Verdict::Warning);
    assert!(report.warnings.iter().any(|w| w.contains("day_of_week:5")));
}

// ============================================================================
// Contract lifecycle
// ============================================================================

#[test]
fn missing_contract_is_drafted_then_approved() {
    let h = harness(no_duplicate_check(), vec![]);
    h.source.insert("tx.csv", transactions_csv(0, true), None);

    let report = h.pipeline.evaluate("tx.csv", "transactions");
    assert_eq!(report.status, ReportStatus::ContractMissing);
    assert_eq!(report.verdict, Verdict::Passed);
    assert!(report.health_indicator.is_none());
    assert_eq!(
        report.log_entry(Stage::Schema).map(|e| e.outcome),
        Some(LogOutcome::ContractMissing)
    );
    assert_eq!(h.store.metric_count(), 0);

    let draft = report.inferred_contract.unwrap();
    let id = draft.find_column("transaction_id").unwrap();
    assert_eq!(id.severity, Severity::Critical);
    assert!(id.constraints.unique);

    let approval = h
        .pipeline
        .approve_contract("transactions", &draft.to_toml().unwrap());
    assert!(approval.accepted, "{:?}", approval.reason);
    assert_eq!(approval.version, Some(1));

    let rerun = h.pipeline.evaluate("tx.csv", "transactions");
    assert_eq!(rerun.status, ReportStatus::Pass);
    assert_eq!(rerun.active_contract.unwrap().version, 1);
}

fn evolving_contract() -> Contract {
    Contract::new(
        "orders",
        1,
        vec![
            ColumnSpec::new("id", LogicalType::String, Severity::Critical),
            ColumnSpec::new("qty", LogicalType::Int, Severity::Warning),
            ColumnSpec::new("note", LogicalType::String, Severity::Warning),
        ],
    )
}

const EVOLVED_BATCH: &str = "id,qty,channel\na,1.5,web\nb,2.0,store\n";

#[test]
fn schema_evolution_is_applied_without_removing_columns() {
    let mut config = PipelineConfig::default();
    config.remediation.require_approval = false;
    let h = harness(config, vec![evolving_contract()]);
    h.source.insert("orders.csv", EVOLVED_BATCH, None);

    let report = h.pipeline.evaluate("orders.csv", "orders");
    assert_eq!(report.status, ReportStatus::PassWithWarnings);
    match report.remediation {
        Some(RemediationOutcome::Applied { version, .. }) => assert_eq!(version, 2),
        other => panic!("unexpected remediation: {:?}", other),
    }

    let active = h.contracts.get("orders").unwrap();
    assert_eq!(active.version, 2);
    assert_eq!(active.column_names(), vec!["id", "qty", "note", "channel"]);
    assert_eq!(active.find_column("qty").unwrap().logical_type, LogicalType::Float);

    let history = h.contracts.history("orders").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
}

#[test]
fn schema_evolution_waits_for_approval_by_default() {
    let h = harness(PipelineConfig::default(), vec![evolving_contract()]);
    h.source.insert("orders.csv", EVOLVED_BATCH, None);

    let report = h.pipeline.evaluate("orders.csv", "orders");
    let proposal = match report.remediation {
        Some(RemediationOutcome::PendingApproval { proposal }) => proposal,
        other => panic!("unexpected remediation: {:?}", other),
    };
    assert_eq!(h.contracts.get("orders").unwrap().version, 1);

    let approval = h
        .pipeline
        .approve_contract("orders", &proposal.to_toml().unwrap());
    assert!(approval.accepted, "{:?}", approval.reason);
    assert_eq!(h.contracts.get("orders").unwrap().version, 2);
}

#[test]
fn approval_that_drops_a_column_is_rejected() {
    let h = harness(PipelineConfig::default(), vec![evolving_contract()]);

    let mut shrunk = evolving_contract();
    shrunk.version = 2;
    shrunk.columns.retain(|c| c.name != "note");

    let approval = h
        .pipeline
        .approve_contract("orders", &shrunk.to_toml().unwrap());
    assert!(!approval.accepted);
    assert!(approval.reason.unwrap().contains("no_column_removed"));
    assert_eq!(h.contracts.get("orders").unwrap().version, 1);
}

#[test]
fn concurrent_applies_write_one_version() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(FileContractRepository::open(dir.path()).unwrap());
    repo.put(&evolving_contract()).unwrap();
    let actuator = RemediationActuator::new(repo.clone());

    let proposals: Vec<Contract> = ["channel", "region"]
        .iter()
        .map(|column| {
            let mut proposal = evolving_contract();
            proposal.version = 2;
            proposal
                .columns
                .push(ColumnSpec::new(*column, LogicalType::String, Severity::Warning));
            proposal
        })
        .collect();

    let barrier = Barrier::new(proposals.len());
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = proposals
            .into_iter()
            .map(|proposal| {
                let (actuator, barrier) = (&actuator, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    actuator.apply(proposal)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let applied: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].version, 2);
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].to_string().contains("revalidation"), "{}", rejected[0]);

    assert_eq!(repo.get("orders").unwrap().version, 2);
    let history = repo.history("orders").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
}

// ============================================================================
// File-backed collaborators
// ============================================================================

#[test]
fn file_backed_run_writes_report_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let batch_path = dir.path().join("tx.csv");
    std::fs::write(&batch_path, transactions_csv(55, true)).unwrap();

    let contracts = FileContractRepository::open(dir.path().join("contracts")).unwrap();
    contracts.put(&transactions_contract()).unwrap();
    let store = JsonlBaselineStore::open(dir.path().join("history")).unwrap();

    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        Arc::new(FileBatchSource::new()),
        Arc::new(contracts),
        Arc::new(store),
        Arc::new(InMemoryLineage::new()),
    );

    let batch_ref = batch_path.to_string_lossy().to_string();
    let report = pipeline.evaluate(&batch_ref, "transactions");
    assert_eq!(report.status, ReportStatus::PassWithWarnings);

    let report_path = dir.path().join("report.json");
    report.save_to_file(&report_path).unwrap();
    let json = std::fs::read_to_string(&report_path).unwrap();
    assert!(json.contains("\"status\": \"PASS_WITH_WARNINGS\""));

    let metrics = std::fs::read_to_string(dir.path().join("history").join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 3);

    // The same file again is a duplicate
    let replay = pipeline.evaluate(&batch_ref, "transactions");
    assert_eq!(replay.status, ReportStatus::Fail);
}

#[test]
fn huge_values_do_not_poison_shared_history() {
    let dir = tempfile::tempdir().unwrap();
    let source = InMemoryBatchSource::new();
    let contracts = InMemoryContractRepository::with_contracts(vec![
        Contract::new(
            "big",
            1,
            vec![ColumnSpec::new("v", LogicalType::Float, Severity::Warning)],
        ),
        Contract::new(
            "other",
            1,
            vec![ColumnSpec::new("id", LogicalType::Int, Severity::Critical)],
        ),
    ]);
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        Arc::new(source.clone()),
        Arc::new(contracts),
        Arc::new(JsonlBaselineStore::open(dir.path()).unwrap()),
        Arc::new(InMemoryLineage::new()),
    );

    source.insert("big.csv", "v\n1e308\n1e308\n1.5\n", None);
    let big = pipeline.evaluate("big.csv", "big");
    assert_eq!(big.status, ReportStatus::Pass, "{:?}", big.warnings);
    assert!(big.stats_summary["v"].mean.is_finite());

    let metrics = std::fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
    for line in metrics.lines() {
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(record["value"].is_f64() || record["value"].is_u64(), "{}", line);
    }

    source.insert("other.csv", "id\n1\n2\n3\n", None);
    let other = pipeline.evaluate("other.csv", "other");
    assert_eq!(other.status, ReportStatus::Pass);
    assert!(other.warnings.is_empty(), "{:?}", other.warnings);
}
