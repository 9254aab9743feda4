//! Data Assistant - one analysis session over an uploaded dataset
//!
//! Owns the active dataset, its profile, the executive summary and the
//! conversation history, and routes each question through the pipeline
//! controller.

use crate::config::PipelineConfig;
use crate::conversation::Conversation;
use crate::error::{PipelineError, Result};
use crate::execution::TabularStore;
use crate::execution_loop::controller::{PipelineController, PipelineRun};
use crate::generation::StructuredGenerator;
use crate::metadata::DatasetProfile;
use crate::profiler::DatasetProfiler;
use crate::summary::{ExecutiveSummary, SummaryGenerator};
use polars::prelude::DataFrame;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct DataAssistant {
    config: PipelineConfig,
    generator_name: String,
    store: Arc<TabularStore>,
    profiler: DatasetProfiler,
    controller: Arc<PipelineController>,
    profile: Option<Arc<DatasetProfile>>,
    summary: Option<ExecutiveSummary>,
    conversation: Conversation,
}

impl DataAssistant {
    pub fn new(config: PipelineConfig, generator: Arc<dyn StructuredGenerator>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(TabularStore::new(config.table_name.clone()));
        let generator_name = generator.name().to_string();
        let controller = Arc::new(PipelineController::new(&config, generator, Arc::clone(&store)));
        Ok(Self {
            profiler: DatasetProfiler::new(&config),
            config,
            generator_name,
            store,
            controller,
            profile: None,
            summary: None,
            conversation: Conversation::new(),
        })
    }

    /// Use a custom controller, e.g. one whose formatter skips phrasing
    pub fn with_controller(mut self, controller: PipelineController) -> Self {
        self.controller = Arc::new(controller);
        self
    }

    pub fn store(&self) -> &Arc<TabularStore> {
        &self.store
    }

    /// Upload a file: profile it, then build the executive summary
    pub async fn upload(&mut self, path: impl AsRef<Path>) -> Result<&ExecutiveSummary> {
        self.load_csv(path)?;
        self.summarize().await
    }

    /// Profile and register a file without summarizing it
    pub fn load_csv(&mut self, path: impl AsRef<Path>) -> Result<Arc<DatasetProfile>> {
        let profile = self.profiler.profile_csv(path, &self.store)?;
        Ok(self.activate(profile))
    }

    pub fn load_frame(&mut self, name: &str, frame: DataFrame) -> Result<Arc<DatasetProfile>> {
        let profile = self.profiler.profile_frame(name, frame, &self.store)?;
        Ok(self.activate(profile))
    }

    fn activate(&mut self, profile: DatasetProfile) -> Arc<DatasetProfile> {
        info!(
            "Dataset '{}' is now active ({} rows, generator '{}')",
            profile.name, profile.row_count, self.generator_name
        );
        let profile = Arc::new(profile);
        // A new dataset replaces the old one along with everything derived from it
        self.profile = Some(Arc::clone(&profile));
        self.summary = None;
        self.conversation.clear();
        profile
    }

    pub async fn summarize(&mut self) -> Result<&ExecutiveSummary> {
        let profile = self.active_profile()?;
        let generator = SummaryGenerator::new(
            Arc::clone(&self.controller),
            self.config.summary_batch_size(),
            self.config.summary_workers,
        );
        let summary: &ExecutiveSummary = self.summary.insert(generator.generate(profile).await);
        Ok(summary)
    }

    /// Answer one question. Only answered questions join the history.
    pub async fn ask(&mut self, question: &str) -> Result<PipelineRun> {
        let profile = self.active_profile()?;
        let history = self.conversation.recent(self.config.history_window).to_vec();
        let run = self.controller.run(question, profile, history).await;
        if let Some(turn) = run.to_turn() {
            self.conversation.push(turn);
        }
        Ok(run)
    }

    pub fn profile(&self) -> Option<&DatasetProfile> {
        self.profile.as_deref()
    }

    pub fn summary(&self) -> Option<&ExecutiveSummary> {
        self.summary.as_ref()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn active_profile(&self) -> Result<Arc<DatasetProfile>> {
        self.profile.clone().ok_or(PipelineError::NoDataset)
    }
}
