//! Impact stage: lineage-weighted priority
//!
//! Attached to the report for alert routing; never changes the verdict.

use datagate_core::{Contract, Criticality, Priority, TablePriority};
use datagate_registry::LineageGraph;

use crate::outcome::StageOutcome;

/// Look up tier, consumers and blast radius of a dataset
pub fn analyze(
    dataset_id: &str,
    contract: Option<&Contract>,
    lineage: &dyn LineageGraph,
) -> StageOutcome<TablePriority> {
    StageOutcome::Continue(table_priority(dataset_id, contract, lineage))
}

/// Priority of a dataset
///
/// With a lineage entry the effective criticality is the highest of the
/// dataset's tier and its consumers' tiers. Without one, the contract's
/// criticality is used.
pub fn table_priority(
    dataset_id: &str,
    contract: Option<&Contract>,
    lineage: &dyn LineageGraph,
) -> TablePriority {
    let blast_radius = lineage.downstream(dataset_id);

    let priority = match lineage.lookup(dataset_id) {
        Some(entry) => {
            let criticality = entry
                .consumers
                .iter()
                .map(|c| c.criticality)
                .fold(entry.criticality, Ord::max);
            TablePriority {
                tier: Priority::from(criticality),
                criticality,
                in_lineage: true,
                consumers: entry.consumers.into_iter().map(|c| c.name).collect(),
                blast_radius,
            }
        }
        None => {
            let criticality = contract.map_or(Criticality::Low, |c| c.criticality);
            TablePriority {
                tier: Priority::from(criticality),
                criticality,
                in_lineage: false,
                consumers: Vec::new(),
                blast_radius,
            }
        }
    };

    tracing::debug!(
        dataset = dataset_id,
        tier = %priority.tier,
        downstream = priority.blast_radius.len(),
        "impact analyzed"
    );
    priority
}
