//! The unit DAG.
//!
//! Nodes are named units with declared input and output data keys. A graph is
//! valid when every output key has exactly one producer, every input key is
//! produced by some node and there are no cycles. Jobs are named subsets of
//! nodes; their order is the graph's topological order restricted to the job.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use thiserror::Error;

use crate::units::UnitKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("data key '{key}' is produced by both '{first}' and '{second}'")]
    DuplicateOutput {
        key: String,
        first: String,
        second: String,
    },

    #[error("node '{node}' reads '{key}', which no node produces")]
    MissingInput { node: String, key: String },

    #[error("dependency cycle through: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job '{job}' names unknown node '{node}'")]
    UnknownNode { job: String, node: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitNode {
    pub name: String,
    pub kind: UnitKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl UnitNode {
    pub fn new(name: &str, kind: UnitKind, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A validated unit DAG plus its named jobs.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: Vec<UnitNode>,
    order: Vec<usize>,
    producers: BTreeMap<String, usize>,
    jobs: BTreeMap<String, Vec<String>>,
}

pub const JOB_ALL: &str = "all";

impl PipelineGraph {
    /// Validate `nodes` and compute the execution order. Ties are broken by
    /// declaration order, so the order is deterministic.
    pub fn new(nodes: Vec<UnitNode>) -> Result<Self, GraphError> {
        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if names.insert(node.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }

        let mut producers: BTreeMap<String, usize> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for key in &node.outputs {
                if let Some(&first) = producers.get(key) {
                    return Err(GraphError::DuplicateOutput {
                        key: key.clone(),
                        first: nodes[first].name.clone(),
                        second: node.name.clone(),
                    });
                }
                producers.insert(key.clone(), i);
            }
        }

        // Edges producer -> consumer, deduplicated.
        let mut downstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        let mut in_degree = vec![0usize; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            let mut upstream = BTreeSet::new();
            for key in &node.inputs {
                let &p = producers.get(key).ok_or_else(|| GraphError::MissingInput {
                    node: node.name.clone(),
                    key: key.clone(),
                })?;
                upstream.insert(p);
            }
            for p in upstream {
                if downstream[p].insert(i) {
                    in_degree[i] += 1;
                }
            }
        }

        // Kahn's algorithm; the ready set is ordered by declaration index.
        let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &d in &downstream[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.insert(d);
                }
            }
        }
        if order.len() < nodes.len() {
            let nodes = (0..nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].name.clone())
                .collect();
            return Err(GraphError::Cycle { nodes });
        }

        let mut jobs = BTreeMap::new();
        jobs.insert(
            JOB_ALL.to_string(),
            order.iter().map(|&i| nodes[i].name.clone()).collect(),
        );

        Ok(Self {
            nodes,
            order,
            producers,
            jobs,
        })
    }

    /// The standard pipeline and its jobs.
    pub fn standard() -> Result<Self, GraphError> {
        use UnitKind::*;
        let nodes = vec![
            UnitNode::new("extract_metadata", ExtractMetadata, &[], &[keys::STAGED_ASSETS]),
            UnitNode::new("store_metadata", Store, &[keys::STAGED_ASSETS], &[keys::METADATA]),
            UnitNode::new("extract_market", ExtractMarket, &[], &[keys::STAGED_MARKET]),
            UnitNode::new(
                "store_market",
                Store,
                &[keys::STAGED_MARKET, keys::METADATA],
                &[keys::MARKET_DATA],
            ),
            UnitNode::new("extract_history", ExtractHistory, &[], &[keys::STAGED_HISTORY]),
            UnitNode::new(
                "store_history",
                Store,
                &[keys::STAGED_HISTORY, keys::METADATA],
                &[keys::PRICE_HISTORY],
            ),
            UnitNode::new("analyze_trends", Analyze, &[keys::PRICE_HISTORY], &[keys::TREND_SUMMARY]),
            UnitNode::new(
                "render_charts",
                Render,
                &[keys::PRICE_HISTORY, keys::MARKET_DATA],
                &[keys::CHARTS],
            ),
            UnitNode::new("monthly_report", MonthlyReport, &[keys::MARKET_DATA], &[keys::MONTHLY_REPORT]),
        ];
        let mut graph = Self::new(nodes)?;
        graph.define_job("metadata", &["extract_metadata", "store_metadata"])?;
        graph.define_job("market", &["extract_market", "store_market"])?;
        graph.define_job("history", &["extract_history", "store_history"])?;
        graph.define_job("analytics", &["analyze_trends", "render_charts"])?;
        graph.define_job("monthly-report", &["monthly_report"])?;
        Ok(graph)
    }

    /// Register a job. Unknown node names are rejected.
    pub fn define_job(&mut self, name: &str, nodes: &[&str]) -> Result<(), GraphError> {
        let mut members = Vec::with_capacity(nodes.len());
        for n in nodes {
            if self.node(n).is_none() {
                return Err(GraphError::UnknownNode {
                    job: name.to_string(),
                    node: n.to_string(),
                });
            }
            members.push(n.to_string());
        }
        self.jobs.insert(name.to_string(), members);
        Ok(())
    }

    pub fn nodes(&self) -> &[UnitNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&UnitNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Node that produces `key`.
    pub fn producer(&self, key: &str) -> Option<&UnitNode> {
        self.producers.get(key).map(|&i| &self.nodes[i])
    }

    /// Every node in execution order.
    pub fn topological_order(&self) -> Vec<&UnitNode> {
        self.order.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    /// Nodes of `job`, in execution order.
    pub fn job(&self, job: &str) -> Result<Vec<&UnitNode>, GraphError> {
        let members: BTreeSet<&str> = self
            .jobs
            .get(job)
            .ok_or_else(|| GraphError::UnknownJob(job.to_string()))?
            .iter()
            .map(String::as_str)
            .collect();
        Ok(self
            .topological_order()
            .into_iter()
            .filter(|n| members.contains(n.name.as_str()))
            .collect())
    }

    /// Human-readable listing of nodes and jobs.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "nodes (execution order):");
        for (i, node) in self.topological_order().into_iter().enumerate() {
            let inputs = if node.inputs.is_empty() {
                "-".to_string()
            } else {
                node.inputs.join(", ")
            };
            let _ = writeln!(
                out,
                "  {:>2}. {:<18} {:<17} in: {inputs}  out: {}",
                i + 1,
                node.name,
                node.kind.as_str(),
                node.outputs.join(", ")
            );
        }
        let _ = writeln!(out, "jobs:");
        for (name, members) in &self.jobs {
            let _ = writeln!(out, "  {:<15} {}", name, members.join(" -> "));
        }
        out
    }
}

/// Data keys of the standard graph.
pub mod keys {
    pub const STAGED_ASSETS: &str = "staged:assets";
    pub const STAGED_MARKET: &str = "staged:market";
    pub const STAGED_HISTORY: &str = "staged:history";
    pub const METADATA: &str = "table:crypto_metadata";
    pub const MARKET_DATA: &str = "table:crypto_market_data";
    pub const PRICE_HISTORY: &str = "table:crypto_price_history";
    pub const TREND_SUMMARY: &str = "table:crypto_trend_summary";
    pub const CHARTS: &str = "artifact:charts";
    pub const MONTHLY_REPORT: &str = "artifact:monthly_report";

    pub fn is_staged(key: &str) -> bool {
        key.starts_with("staged:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(nodes: Vec<&UnitNode>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn standard_graph_orders_extract_before_store() {
        let graph = PipelineGraph::standard().unwrap();
        let order = names(graph.topological_order());
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("extract_metadata") < pos("store_metadata"));
        assert!(pos("store_metadata") < pos("store_market"));
        assert!(pos("store_metadata") < pos("store_history"));
        assert!(pos("store_history") < pos("analyze_trends"));
        assert!(pos("store_market") < pos("render_charts"));
        assert!(pos("store_market") < pos("monthly_report"));
        assert_eq!(order.len(), 9);
    }

    #[test]
    fn order_is_deterministic() {
        let a = names(PipelineGraph::standard().unwrap().topological_order()).join(",");
        for _ in 0..5 {
            let b = names(PipelineGraph::standard().unwrap().topological_order()).join(",");
            assert_eq!(a, b);
        }
    }

    #[test]
    fn jobs_select_nodes_in_order() {
        let graph = PipelineGraph::standard().unwrap();
        assert_eq!(
            names(graph.job("history").unwrap()),
            vec!["extract_history", "store_history"]
        );
        assert_eq!(graph.job(JOB_ALL).unwrap().len(), 9);
        assert_eq!(
            graph.job("weekly"),
            Err(GraphError::UnknownJob("weekly".into()))
        );
        assert_eq!(
            graph.job_names(),
            vec!["all", "analytics", "history", "market", "metadata", "monthly-report"]
        );
    }

    #[test]
    fn rejects_cycles() {
        let err = PipelineGraph::new(vec![
            UnitNode::new("a", UnitKind::Analyze, &["y"], &["x"]),
            UnitNode::new("b", UnitKind::Render, &["x"], &["y"]),
            UnitNode::new("c", UnitKind::Store, &[], &["z"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                nodes: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn rejects_missing_inputs_and_duplicates() {
        let missing = PipelineGraph::new(vec![UnitNode::new("a", UnitKind::Analyze, &["nope"], &[])]);
        assert!(matches!(missing, Err(GraphError::MissingInput { .. })));

        let dup_output = PipelineGraph::new(vec![
            UnitNode::new("a", UnitKind::Store, &[], &["x"]),
            UnitNode::new("b", UnitKind::Store, &[], &["x"]),
        ]);
        assert!(matches!(dup_output, Err(GraphError::DuplicateOutput { .. })));

        let dup_node = PipelineGraph::new(vec![
            UnitNode::new("a", UnitKind::Store, &[], &["x"]),
            UnitNode::new("a", UnitKind::Store, &[], &["y"]),
        ]);
        assert_eq!(dup_node.unwrap_err(), GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn describe_lists_jobs() {
        let text = PipelineGraph::standard().unwrap().describe();
        assert!(text.contains("extract_metadata"));
        let mut graph = PipelineGraph::standard().unwrap();
        assert!(matches!(
            graph.define_job("broken", &["extract_everything"]),
            Err(GraphError::UnknownNode { .. })
        ));
        assert!(text.contains("analytics       analyze_trends -> render_charts"));
    }
}
