//! Lineage graph: criticality tiers, consumers and downstream traversal
//!
//! Builds forward and reverse dependency edges for impact analysis.

use datagate_core::Criticality;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::LineageError;

/// A downstream consumer of a dataset (dashboard, model, export, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub name: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub criticality: Criticality,
}

fn default_kind() -> String {
    "dataset".to_string()
}

/// What lineage knows about one dataset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineageEntry {
    #[serde(default)]
    pub criticality: Criticality,

    #[serde(default)]
    pub upstream: Vec<String>,

    #[serde(default)]
    pub consumers: Vec<Consumer>,
}

/// Read-only lineage lookups
pub trait LineageGraph: Send + Sync {
    /// Tier, upstream and consumers of a dataset; `None` when unknown
    fn lookup(&self, dataset_id: &str) -> Option<LineageEntry>;

    /// Everything transitively downstream of a dataset (the blast radius)
    fn downstream(&self, dataset_id: &str) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
struct LineageDocument {
    #[serde(default)]
    datasets: BTreeMap<String, LineageEntry>,
}

/// Lineage graph held in memory
///
/// Edges come from two places: a dataset's `upstream` list, and its
/// `consumers` list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLineage {
    entries: HashMap<String, LineageEntry>,

    /// Forward edges: node -> nodes it reads from
    parents: HashMap<String, Vec<String>>,

    /// Reverse edges: node -> nodes that read from it
    children: HashMap<String, Vec<String>>,
}

impl InMemoryLineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a lineage document:
    ///
    /// ```toml
    /// [datasets.orders]
    /// criticality = "high"
    /// upstream = ["raw_orders"]
    ///
    /// [[datasets.orders.consumers]]
    /// name = "revenue_dashboard"
    /// kind = "dashboard"
    /// criticality = "critical"
    /// ```
    pub fn from_toml(toml: &str) -> Result<Self, LineageError> {
        let doc: LineageDocument =
            toml::from_str(toml).map_err(|e| LineageError::Parse(e.to_string()))?;

        let mut graph = Self::new();
        for (dataset_id, entry) in doc.datasets {
            graph.insert(dataset_id, entry);
        }
        Ok(graph)
    }

    /// Load a lineage document from a file
    pub fn from_file(path: &Path) -> Result<Self, LineageError> {
        let contents = std::fs::read_to_string(path).map_err(|e| LineageError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Add a dataset and its edges
    pub fn insert(&mut self, dataset_id: impl Into<String>, entry: LineageEntry) {
        let dataset_id = dataset_id.into();

        for parent in &entry.upstream {
            self.add_edge(parent, &dataset_id);
        }
        for consumer in &entry.consumers {
            self.add_edge(&dataset_id, &consumer.name);
        }

        self.entries.insert(dataset_id, entry);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_dataset(mut self, dataset_id: impl Into<String>, entry: LineageEntry) -> Self {
        self.insert(dataset_id, entry);
        self
    }

    fn add_edge(&mut self, parent: &str, child: &str) {
        let children = self.children.entry(parent.to_string()).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
        let parents = self.parents.entry(child.to_string()).or_default();
        if !parents.iter().any(|p| p == parent) {
            parents.push(parent.to_string());
        }
    }

    /// Immediate parents of a node
    pub fn parents(&self, node: &str) -> Vec<&String> {
        self.parents
            .get(node)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Immediate children of a node
    pub fn children(&self, node: &str) -> Vec<&String> {
        self.children
            .get(node)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// All upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node: &str) -> Vec<String> {
        Self::walk(&self.parents, node)
    }

    /// Breadth-first closure over one edge direction
    fn walk(edges: &HashMap<String, Vec<String>>, start: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&String> = edges.get(start).into_iter().flatten().collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if current == start || !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            if let Some(next) = edges.get(current) {
                queue.extend(next.iter().filter(|n| !visited.contains(*n)));
            }
        }

        result
    }
}

impl LineageGraph for InMemoryLineage {
    fn lookup(&self, dataset_id: &str) -> Option<LineageEntry> {
        self.entries.get(dataset_id).cloned()
    }

    fn downstream(&self, dataset_id: &str) -> Vec<String> {
        Self::walk(&self.children, dataset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LINEAGE: &str = r#"
[datasets.raw_orders]
criticality = "low"

[datasets.orders]
criticality = "medium"
upstream = ["raw_orders"]

[[datasets.orders.consumers]]
name = "revenue_dashboard"
kind = "dashboard"
criticality = "critical"

[datasets.order_facts]
upstream = ["orders"]

[[datasets.order_facts.consumers]]
name = "weekly_export"
"#;

    #[test]
    fn parse_document() {
        let lineage = InMemoryLineage::from_toml(LINEAGE).unwrap();
        let orders = lineage.lookup("orders").unwrap();
        assert_eq!(orders.criticality, Criticality::Medium);
        assert_eq!(orders.upstream, vec!["raw_orders"]);
        assert_eq!(orders.consumers[0].criticality, Criticality::Critical);

        let facts = lineage.lookup("order_facts").unwrap();
        assert_eq!(facts.criticality, Criticality::Low);
        assert_eq!(facts.consumers[0].kind, "dataset");
        assert!(lineage.lookup("unknown").is_none());
    }

    #[test]
    fn downstream_is_transitive() {
        let lineage = InMemoryLineage::from_toml(LINEAGE).unwrap();
        let mut downstream = lineage.downstream("raw_orders");
        downstream.sort();
        assert_eq!(
            downstream,
            vec!["order_facts", "orders", "revenue_dashboard", "weekly_export"]
        );
        assert!(lineage.downstream("weekly_export").is_empty());
    }

    #[test]
    fn upstream_and_direct_edges() {
        let lineage = InMemoryLineage::from_toml(LINEAGE).unwrap();
        assert_eq!(lineage.upstream("order_facts"), vec!["orders", "raw_orders"]);
        assert_eq!(lineage.parents("orders"), vec!["raw_orders"]);
        assert_eq!(lineage.children("orders").len(), 2);
    }

    #[test]
    fn cycles_terminate() {
        let lineage = InMemoryLineage::new()
            .with_dataset(
                "a",
                LineageEntry {
                    upstream: vec!["b".into()],
                    ..Default::default()
                },
            )
            .with_dataset(
                "b",
                LineageEntry {
                    upstream: vec!["a".into()],
                    ..Default::default()
                },
            );
        assert_eq!(lineage.downstream("a"), vec!["b"]);
    }
}
