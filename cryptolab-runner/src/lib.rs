//! cryptolab runner: units of work, the unit graph and everything around it.
//!
//! This crate builds on `cryptolab-core` to provide:
//! - TOML pipeline configuration
//! - Units of work (extract, store, analyze, render, monthly report)
//! - Staged payloads between extract and store
//! - The unit DAG, named jobs and a local sequential executor
//! - SVG chart rendering and monthly report export
//! - A JSONL run log

pub mod chart;
pub mod config;
pub mod executor;
pub mod graph;
pub mod pipeline;
pub mod run_log;
pub mod staging;
pub mod units;

pub use chart::{ChartArtifact, ChartRenderer, ChartSubject, MonthlyReport, RenderError};
pub use config::{ConfigError, PipelineConfig};
pub use executor::{run_job, JobReport, NodeRun};
pub use graph::{GraphError, PipelineGraph, UnitNode};
pub use pipeline::{Pipeline, PipelineError};
pub use run_log::RunLog;
pub use staging::{StagedPayload, StagingArea, StagingError};
pub use units::{run_unit, UnitContext, UnitError, UnitInput, UnitKind, UnitResult, UnitStatus};
