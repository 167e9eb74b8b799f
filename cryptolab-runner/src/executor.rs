//! Local sequential executor.
//!
//! Runs the nodes of one job in topological order. A node is skipped when one
//! of its inputs should have been produced earlier in the same run by a node
//! that failed or was itself skipped. Inputs produced by nodes outside the job
//! are assumed to be in place already (for instance the asset table when only
//! the `market` job runs).

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{keys, GraphError, PipelineGraph};
use crate::run_log::RunLog;
use crate::units::{run_unit, UnitContext, UnitInput, UnitKind, UnitResult, UnitStatus};

/// What happened to one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeRun {
    Ran(UnitResult),
    Skipped {
        node: String,
        unit: UnitKind,
        /// Inputs that were not produced.
        missing: Vec<String>,
    },
}

impl NodeRun {
    pub fn node(&self) -> &str {
        match self {
            NodeRun::Ran(r) => r.node.as_deref().unwrap_or_default(),
            NodeRun::Skipped { node, .. } => node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job: String,
    pub as_of: NaiveDate,
    pub runs: Vec<NodeRun>,
}

impl JobReport {
    /// Failure if any node failed, partial if any node was skipped or partial.
    pub fn status(&self) -> UnitStatus {
        let mut status = UnitStatus::Success;
        for run in &self.runs {
            match run {
                NodeRun::Ran(r) if r.status == UnitStatus::Failure => return UnitStatus::Failure,
                NodeRun::Ran(r) if r.status == UnitStatus::Partial => status = UnitStatus::Partial,
                NodeRun::Skipped { .. } => status = UnitStatus::Partial,
                NodeRun::Ran(_) => {}
            }
        }
        status
    }

    pub fn result(&self, node: &str) -> Option<&UnitResult> {
        self.runs.iter().find_map(|run| match run {
            NodeRun::Ran(r) if r.node.as_deref() == Some(node) => Some(r),
            _ => None,
        })
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.runs
            .iter()
            .filter(|r| matches!(r, NodeRun::Skipped { .. }))
            .map(NodeRun::node)
            .collect()
    }

    pub fn rows(&self) -> usize {
        self.runs
            .iter()
            .map(|run| match run {
                NodeRun::Ran(r) => r.rows,
                NodeRun::Skipped { .. } => 0,
            })
            .sum()
    }
}

/// Run `job` of `graph`. `base` supplies the shared inputs; its `as_of` is
/// fixed to today when unset so every node sees the same run date.
pub fn run_job(
    graph: &PipelineGraph,
    ctx: &UnitContext<'_>,
    job: &str,
    base: &UnitInput,
    run_log: Option<&RunLog>,
) -> Result<JobReport, GraphError> {
    let nodes = graph.job(job)?;
    let as_of = base.as_of.unwrap_or_else(|| Utc::now().date_naive());
    tracing::info!(job, %as_of, nodes = nodes.len(), "job started");

    let mut unavailable: BTreeSet<&str> = BTreeSet::new();
    let mut payload_keys: BTreeMap<&str, String> = BTreeMap::new();
    let mut runs = Vec::with_capacity(nodes.len());

    for node in nodes {
        let missing: Vec<String> = node
            .inputs
            .iter()
            .filter(|k| unavailable.contains(k.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(node = %node.name, ?missing, "node skipped");
            unavailable.extend(node.outputs.iter().map(String::as_str));
            runs.push(NodeRun::Skipped {
                node: node.name.clone(),
                unit: node.kind,
                missing,
            });
            continue;
        }

        let mut input = UnitInput {
            as_of: Some(as_of),
            payload_key: None,
            ..base.clone()
        };
        if node.kind == UnitKind::Store {
            input.payload_key = node
                .inputs
                .iter()
                .filter(|k| keys::is_staged(k))
                .find_map(|k| payload_keys.get(k.as_str()).cloned())
                .or_else(|| base.payload_key.clone());
        }

        let mut result = run_unit(ctx, node.kind, &input);
        result.node = Some(node.name.clone());
        if let Some(log) = run_log {
            if let Err(e) = log.append(&result) {
                tracing::warn!(path = %log.path().display(), error = %e, "failed to append run log");
            }
        }

        if result.is_failure() {
            unavailable.extend(node.outputs.iter().map(String::as_str));
        } else if let Some(payload_key) = result.outputs.first() {
            for key in node.outputs.iter().filter(|k| keys::is_staged(k)) {
                payload_keys.insert(key.as_str(), payload_key.clone());
            }
        }
        runs.push(NodeRun::Ran(result));
    }

    let report = JobReport {
        job: job.to_string(),
        as_of,
        runs,
    };
    tracing::info!(job, status = %report.status(), rows = report.rows(), "job finished");
    Ok(report)
}
