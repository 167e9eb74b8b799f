//! A configured pipeline: storage, staging, renderer, run log, provider and
//! the unit graph, opened from a `PipelineConfig`.

use std::sync::Arc;
use thiserror::Error;

use cryptolab_core::api::{CoinGeckoClient, FetchError, MarketDataProvider};
use cryptolab_core::storage::{Storage, StorageError};
use cryptolab_core::CancelToken;

use crate::chart::ChartRenderer;
use crate::config::{ConfigError, PipelineConfig};
use crate::executor::{self, JobReport};
use crate::graph::{GraphError, PipelineGraph};
use crate::run_log::RunLog;
use crate::staging::StagingArea;
use crate::units::{self, UnitContext, UnitInput, UnitKind, UnitResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to build API client: {0}")]
    Client(#[from] FetchError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub struct Pipeline {
    config: PipelineConfig,
    storage: Storage,
    staging: StagingArea,
    renderer: ChartRenderer,
    run_log: RunLog,
    provider: Arc<dyn MarketDataProvider>,
    graph: PipelineGraph,
    cancel: CancelToken,
}

impl Pipeline {
    /// Open the database and build the CoinGecko client from `config`.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let cancel = CancelToken::new();
        let client = CoinGeckoClient::new(&config.api.client)?.with_cancel(cancel.clone());
        let storage = Storage::open(&config.storage.database_path)?;
        Self::assemble(config, storage, Arc::new(client), cancel)
    }

    /// Pipeline over an already opened storage and any provider.
    pub fn with_provider(
        config: PipelineConfig,
        storage: Storage,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Self::assemble(config, storage, provider, CancelToken::new())
    }

    fn assemble(
        config: PipelineConfig,
        storage: Storage,
        provider: Arc<dyn MarketDataProvider>,
        cancel: CancelToken,
    ) -> Result<Self, PipelineError> {
        let staging = StagingArea::new(&config.output.staging_dir);
        let renderer = ChartRenderer::new(
            &config.output.chart_dir,
            config.report.top_n,
            config.analysis.trend.window_days,
        );
        let run_log = RunLog::new(&config.output.run_log);
        let graph = PipelineGraph::standard()?;
        tracing::debug!(
            database = storage.location(),
            provider = provider.name(),
            "pipeline ready"
        );
        Ok(Self {
            config,
            storage,
            staging,
            renderer,
            run_log,
            provider,
            graph,
            cancel,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    /// Token that aborts the current unit between API calls and writes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> UnitContext<'_> {
        UnitContext {
            config: &self.config,
            provider: self.provider.as_ref(),
            storage: &self.storage,
            staging: &self.staging,
            renderer: &self.renderer,
            cancel: self.cancel.clone(),
        }
    }

    /// Run a single unit and log its result.
    pub fn run_unit(&self, kind: UnitKind, input: &UnitInput) -> UnitResult {
        let result = units::run_unit(&self.context(), kind, input);
        if let Err(e) = self.run_log.append(&result) {
            tracing::warn!(path = %self.run_log.path().display(), error = %e, "failed to append run log");
        }
        result
    }

    pub fn run_job(&self, job: &str, input: &UnitInput) -> Result<JobReport, GraphError> {
        executor::run_job(&self.graph, &self.context(), job, input, Some(&self.run_log))
    }
}
