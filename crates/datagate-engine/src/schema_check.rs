//! Schema stage: validate a batch against its contract
//!
//! Also drafts a contract from a batch when a dataset has none.

use chrono::Utc;
use datagate_core::{
    compile_pattern, Batch, BatchColumn, ColumnSpec, Constraint, ConstraintSet, Contract,
    IssueCode, Lifecycle, LifecycleStatus, Severity, StageError, Value, Violation,
};
use datagate_registry::ReferenceSource;
use std::collections::HashSet;

use crate::outcome::StageOutcome;

/// Schema stage payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaFindings {
    pub violations: Vec<Violation>,

    /// Informational notes (e.g. reference data that was unavailable)
    pub notes: Vec<String>,
}

impl SchemaFindings {
    pub fn critical_count(&self) -> usize {
        self.violations.iter().filter(|v| v.is_critical()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.violations.len() - self.critical_count()
    }

    /// Violations describing new columns or changed types
    pub fn evolution(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.issue.is_evolution())
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} violation(s): {} critical, {} warning",
            self.violations.len(),
            self.critical_count(),
            self.warning_count()
        );
        for note in &self.notes {
            summary.push_str("; ");
            summary.push_str(note);
        }
        summary
    }
}

/// Validate a batch against a contract
pub fn validate(
    contract: &Contract,
    batch: &Batch,
    references: Option<&dyn ReferenceSource>,
) -> StageOutcome<SchemaFindings> {
    let mut findings = SchemaFindings::default();

    // Track which batch columns the contract declares
    let mut declared = HashSet::new();

    for spec in &contract.columns {
        let name = spec.normalized_name();
        declared.insert(name.clone());

        match batch.column(&name) {
            Some(column) => check_column(spec, column, &mut findings.violations),
            None => findings.violations.push(Violation::new(
                &spec.name,
                IssueCode::Missing,
                spec.severity,
                format!("column of type {}", spec.logical_type),
                "absent",
            )),
        }
    }

    for column in batch.columns() {
        if !declared.contains(&column.name) {
            findings.violations.push(Violation::new(
                &column.name,
                IssueCode::Extra,
                Severity::Warning,
                "not declared",
                format!("column of type {}", column.logical_type),
            ));
        }
    }

    check_references(contract, batch, references, &mut findings);

    let critical = findings.critical_count();
    let warnings = findings.warning_count();
    if critical > 0 {
        tracing::warn!(
            dataset = %contract.dataset_id,
            critical,
            warnings,
            "critical contract violations"
        );
        StageOutcome::Stop(Some(findings), StageError::ContractViolation { critical, warnings })
    } else {
        let reasons = findings.violations.iter().map(Violation::describe).collect();
        StageOutcome::warn_if(findings, reasons)
    }
}

fn check_column(spec: &ColumnSpec, column: &BatchColumn, violations: &mut Vec<Violation>) {
    let type_ok = spec.logical_type.accepts(&column.logical_type);
    if !type_ok {
        violations.push(Violation::new(
            &spec.name,
            IssueCode::TypeMismatch,
            spec.severity,
            spec.logical_type.to_string(),
            column.logical_type.to_string(),
        ));
    }

    let mut violation = |issue: IssueCode, expected: String, actual: String| {
        violations.push(Violation::new(&spec.name, issue, spec.severity, expected, actual));
    };

    for rule in spec.constraints.rules() {
        match rule {
            Constraint::NullableMaxPct(max) => {
                let pct = column.null_pct();
                if pct > max + 1e-9 {
                    violation(
                        IssueCode::NullRate,
                        format!("nulls <= {}%", fmt_num(max)),
                        format!("{}%", fmt_num(pct)),
                    );
                }
            }
            Constraint::Unique => {
                let non_null = column.values.len() - column.null_count();
                let duplicates = non_null - column.distinct_count();
                if duplicates > 0 {
                    violation(
                        IssueCode::Duplicate,
                        "unique values".to_string(),
                        format!("{} duplicate value(s)", duplicates),
                    );
                }
            }
            Constraint::Min(min) if type_ok => {
                let below: Vec<f64> = column.numeric_values().into_iter().filter(|v| *v < min).collect();
                if let Some(lowest) = below.iter().copied().reduce(f64::min) {
                    violation(
                        IssueCode::BelowMin,
                        format!(">= {}", fmt_num(min)),
                        format!("{} value(s) below, lowest {}", below.len(), fmt_num(lowest)),
                    );
                }
            }
            Constraint::Max(max) if type_ok => {
                let above: Vec<f64> = column.numeric_values().into_iter().filter(|v| *v > max).collect();
                if let Some(highest) = above.iter().copied().reduce(f64::max) {
                    violation(
                        IssueCode::AboveMax,
                        format!("<= {}", fmt_num(max)),
                        format!("{} value(s) above, highest {}", above.len(), fmt_num(highest)),
                    );
                }
            }
            Constraint::Min(_) | Constraint::Max(_) => {}
            Constraint::Pattern(pattern) => {
                // Patterns are validated when the contract is loaded
                let Ok(regex) = compile_pattern(pattern) else {
                    continue;
                };
                let failing = rendered(column).filter(|v| !regex.is_match(v)).collect::<Vec<_>>();
                if let Some(example) = failing.first() {
                    violation(
                        IssueCode::PatternMismatch,
                        format!("matches /{}/", pattern),
                        format!("{} value(s) do not match, e.g. '{}'", failing.len(), example),
                    );
                }
            }
            Constraint::AllowedValues(allowed) => {
                let failing = rendered(column)
                    .filter(|v| !allowed.iter().any(|a| a == v))
                    .collect::<Vec<_>>();
                if let Some(example) = failing.first() {
                    violation(
                        IssueCode::DisallowedValue,
                        format!("one of [{}]", allowed.join(", ")),
                        format!("{} value(s) outside the set, e.g. '{}'", failing.len(), example),
                    );
                }
            }
        }
    }
}

fn check_references(
    contract: &Contract,
    batch: &Batch,
    references: Option<&dyn ReferenceSource>,
    findings: &mut SchemaFindings,
) {
    for reference in &contract.constraints.references {
        let Some(column) = batch.column(&reference.column) else {
            continue;
        };
        let keys = references.and_then(|r| r.keys(&reference.dataset, &reference.key));
        let Some(keys) = keys else {
            findings.notes.push(format!(
                "reference data for {}.{} unavailable; '{}' not checked",
                reference.dataset, reference.key, reference.column
            ));
            continue;
        };

        let orphans: Vec<String> = rendered(column).filter(|v| !keys.contains(v)).collect();
        if let Some(example) = orphans.first() {
            let severity = contract
                .find_column(&reference.column)
                .map_or(Severity::Warning, |c| c.severity);
            findings.violations.push(Violation::new(
                &reference.column,
                IssueCode::OrphanKey,
                severity,
                format!("keys present in {}.{}", reference.dataset, reference.key),
                format!("{} orphan value(s), e.g. '{}'", orphans.len(), example),
            ));
        }
    }
}

fn rendered(column: &BatchColumn) -> impl Iterator<Item = String> + '_ {
    column.values.iter().filter_map(Value::render)
}

/// Up to two decimals, trailing zeros trimmed
fn fmt_num(value: f64) -> String {
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Draft a contract for a dataset that has none
///
/// Columns without nulls become CRITICAL and not-null; others WARNING.
/// Fully distinct columns are marked unique and non-negative numeric columns
/// get `min = 0`.
pub fn draft_contract(dataset_id: &str, batch: &Batch) -> Contract {
    let columns = batch
        .columns()
        .iter()
        .map(|column| {
            let nulls = column.null_count();
            let mut constraints = ConstraintSet::new();
            let severity = if nulls == 0 {
                constraints = constraints.not_null();
                Severity::Critical
            } else {
                Severity::Warning
            };

            if nulls == 0 && column.distinct_count() == column.values.len() {
                constraints = constraints.unique();
            }

            let numbers = column.numeric_values();
            if column.logical_type.is_numeric()
                && !numbers.is_empty()
                && numbers.iter().all(|v| *v >= 0.0)
            {
                constraints = constraints.min(0.0);
            }

            ColumnSpec::new(column.name.clone(), column.logical_type, severity)
                .with_constraints(constraints)
        })
        .collect();

    Contract::new(dataset_id, 1, columns).with_lifecycle(Lifecycle {
        status: LifecycleStatus::Draft,
        owner: None,
        description: Some(format!(
            "Drafted from a batch of {} rows; review before approving",
            batch.row_count()
        )),
        created_at: Some(Utc::now()),
    })
}
