//! Task orchestration.
//!
//! Tasks run strictly one after another in catalog order. A task that needs
//! a browser gets a fresh session which is closed when the task ends,
//! whether it succeeded or not. The first failing task aborts the run; the
//! report is only composed after every task has succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, Instrument};
use url::Url;

use crate::browser::{BrowserConnector, ChromeConnector, PageSession};
use crate::catalog::{
    artifact_name, DirectDownloadRecipe, ExtractionTask, ImageLinksRecipe, PdfCropRecipe, Recipe,
    ScreenshotRecipe,
};
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::extract::{screenshot, CropBox, PdfTools, Poppler, Settle};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::locator::Locator;
use crate::report::Composer;

/// Where a task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Connecting,
    Navigating,
    Locating,
    Fetching,
    Extracting,
    Writing,
    Done,
    Failed,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Idle => 0,
            TaskState::Connecting => 1,
            TaskState::Navigating => 2,
            TaskState::Locating => 3,
            TaskState::Fetching => 4,
            TaskState::Extracting => 5,
            TaskState::Writing => 6,
            TaskState::Done => 7,
            TaskState::Failed => 8,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    /// States only move forward (steps may be skipped), except that
    /// `Writing` loops back for the next item of a multi-output task.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskState::Idle => false,
            TaskState::Failed => self != TaskState::Idle,
            TaskState::Fetching | TaskState::Extracting if self == TaskState::Writing => true,
            _ => next.rank() > self.rank(),
        }
    }
}

/// State tracker for one task execution.
#[derive(Debug, Clone)]
pub struct TaskRun {
    state: TaskState,
    trace: Vec<TaskState>,
}

impl Default for TaskRun {
    fn default() -> Self {
        Self {
            state: TaskState::Idle,
            trace: vec![TaskState::Idle],
        }
    }
}

impl TaskRun {
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn trace(&self) -> &[TaskState] {
        &self.trace
    }

    /// Enter `next`. Re-entering the current state is a no-op.
    pub fn advance(&mut self, next: TaskState) {
        if next == self.state {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.trace.push(next);
    }
}

/// Result of one successful task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: String,
    /// Output files written, in the order they were produced.
    pub artifacts: Vec<PathBuf>,
    pub trace: Vec<TaskState>,
}

/// Result of a complete run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TaskOutcome>,
    /// Rendered report, if composition ran.
    pub report: Option<PathBuf>,
}

impl RunSummary {
    pub fn artifact_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.artifacts.len()).sum()
    }
}

/// The scraping pipeline and the services it drives.
pub struct Pipeline {
    source_dir: PathBuf,
    output_dir: PathBuf,
    connector: Arc<dyn BrowserConnector>,
    fetcher: Arc<dyn Fetcher>,
    pdf: Arc<dyn PdfTools>,
}

impl Pipeline {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        connector: Arc<dyn BrowserConnector>,
        fetcher: Arc<dyn Fetcher>,
        pdf: Arc<dyn PdfTools>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            connector,
            fetcher,
            pdf,
        }
    }

    /// Build the production pipeline: remote Chrome, reqwest, poppler-utils.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            &settings.source_dir,
            &settings.output_dir,
            Arc::new(ChromeConnector::from_settings(settings)),
            Arc::new(HttpFetcher::from_settings(settings)?),
            Arc::new(Poppler::new(&settings.tools)),
        ))
    }

    /// Run `tasks` in order, stopping at the first failure.
    ///
    /// The source and output directories must exist.
    pub async fn run(&self, tasks: &[&ExtractionTask]) -> Result<RunSummary> {
        info!("Running {} task(s)", tasks.len());
        let mut summary = RunSummary::default();
        for task in tasks {
            let outcome = self.run_task(task).await?;
            summary.outcomes.push(outcome);
        }
        info!(
            "All tasks done, {} artifact(s) in {}",
            summary.artifact_count(),
            self.output_dir.display()
        );
        Ok(summary)
    }

    /// Run `tasks`, then compose the report if every task succeeded.
    pub async fn run_then_compose(
        &self,
        tasks: &[&ExtractionTask],
        composer: Option<&dyn Composer>,
    ) -> Result<RunSummary> {
        let mut summary = self.run(tasks).await?;
        if let Some(composer) = composer {
            summary.report = Some(composer.compose().await?);
        }
        Ok(summary)
    }

    /// Run a single task inside its own span.
    pub async fn run_task(&self, task: &ExtractionTask) -> Result<TaskOutcome> {
        let span = info_span!("task", name = %task.name);
        async {
            info!("{}", task.title);
            let mut run = TaskRun::default();

            let result = if task.recipe.needs_browser() {
                run.advance(TaskState::Connecting);
                match self.connector.connect().await {
                    Ok(mut session) => {
                        let result = self.execute(task, &mut run, Some(session.as_mut())).await;
                        session.disconnect().await;
                        result
                    }
                    Err(e) => Err(e),
                }
            } else {
                self.execute(task, &mut run, None).await
            };

            match result {
                Ok(artifacts) => {
                    run.advance(TaskState::Done);
                    info!("Wrote {} artifact(s)", artifacts.len());
                    Ok(TaskOutcome {
                        task: task.name.clone(),
                        artifacts,
                        trace: run.trace().to_vec(),
                    })
                }
                Err(e) => {
                    error!(state = ?run.state(), kind = e.kind(), "Task failed: {}", e);
                    run.advance(TaskState::Failed);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        task: &ExtractionTask,
        run: &mut TaskRun,
        session: Option<&mut dyn PageSession>,
    ) -> Result<Vec<PathBuf>> {
        match (&task.recipe, session) {
            (Recipe::PdfCrop(recipe), Some(session)) => {
                self.pdf_crop(task, recipe, run, session).await
            }
            (Recipe::ImageLinks(recipe), Some(session)) => {
                self.image_links(task, recipe, run, session).await
            }
            (Recipe::Screenshot(recipe), Some(session)) => {
                self.screenshot(task, recipe, run, session).await
            }
            (Recipe::DirectDownload(recipe), _) => self.direct_download(task, recipe, run).await,
            (recipe, None) => Err(PipelineError::Browser(format!(
                "{} recipe needs a browser session",
                recipe.kind()
            ))),
        }
    }

    async fn pdf_crop(
        &self,
        task: &ExtractionTask,
        recipe: &PdfCropRecipe,
        run: &mut TaskRun,
        session: &mut dyn PageSession,
    ) -> Result<Vec<PathBuf>> {
        run.advance(TaskState::Navigating);
        let (html, base) = render(session, &recipe.page_url).await?;

        run.advance(TaskState::Locating);
        let link = Locator::anchor(&recipe.link_pattern)?.find_first(&html, &base)?;
        info!("Document: {}", link);

        run.advance(TaskState::Fetching);
        let bytes = self.fetcher.fetch(link.as_str()).await?;
        let source = self.source_dir.join(format!("{}.pdf", task.name));
        write_file(&source, &bytes).await?;

        run.advance(TaskState::Extracting);
        let anchors = self.pdf.locate(&source, &recipe.anchors).await?;

        let mut artifacts = Vec::with_capacity(recipe.regions.len());
        for (index, region) in recipe.regions.iter().enumerate() {
            run.advance(TaskState::Extracting);
            let crop = CropBox::resolve(region, &anchors)?;

            run.advance(TaskState::Writing);
            let output = self.output_path(&task.name, index + 1, "svg");
            debug!("Cropping {:?} into {}", crop, output.display());
            self.pdf.crop_to_svg(&source, &output, &crop).await?;
            artifacts.push(output);
        }
        Ok(artifacts)
    }

    async fn image_links(
        &self,
        task: &ExtractionTask,
        recipe: &ImageLinksRecipe,
        run: &mut TaskRun,
        session: &mut dyn PageSession,
    ) -> Result<Vec<PathBuf>> {
        run.advance(TaskState::Navigating);
        let (html, base) = render(session, &recipe.page_url).await?;

        run.advance(TaskState::Locating);
        let images = Locator::image(&recipe.image_pattern)?.find_all(&html, &base)?;
        if images.is_empty() {
            return Err(PipelineError::not_found(
                format!("img[src] on {}", base),
                &recipe.image_pattern,
            ));
        }
        info!("Found {} image(s)", images.len());

        let mut artifacts = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            run.advance(TaskState::Fetching);
            let bytes = self.fetcher.fetch(image.as_str()).await?;

            run.advance(TaskState::Writing);
            let output = self.output_path(&task.name, index + 1, "png");
            write_file(&output, &bytes).await?;
            artifacts.push(output);
        }
        Ok(artifacts)
    }

    async fn screenshot(
        &self,
        task: &ExtractionTask,
        recipe: &ScreenshotRecipe,
        run: &mut TaskRun,
        session: &mut dyn PageSession,
    ) -> Result<Vec<PathBuf>> {
        run.advance(TaskState::Navigating);
        session.goto(&recipe.page_url).await?;

        run.advance(TaskState::Extracting);
        let png = screenshot::capture(session, &recipe.clip, &Settle::from_recipe(recipe)).await?;

        run.advance(TaskState::Writing);
        let output = self.output_path(&task.name, 1, "png");
        write_file(&output, &png).await?;
        Ok(vec![output])
    }

    async fn direct_download(
        &self,
        task: &ExtractionTask,
        recipe: &DirectDownloadRecipe,
        run: &mut TaskRun,
    ) -> Result<Vec<PathBuf>> {
        let mut artifacts = Vec::with_capacity(recipe.documents.len());
        for document in &recipe.documents {
            run.advance(TaskState::Fetching);
            info!("Downloading {}", document.label);
            let bytes = self.fetcher.fetch(&document.url).await?;
            let source = self
                .source_dir
                .join(artifact_name(&task.name, &document.label, "pdf"));
            write_file(&source, &bytes).await?;

            run.advance(TaskState::Writing);
            let output = self
                .output_dir
                .join(artifact_name(&task.name, &document.label, "svg"));
            self.pdf.convert_to_svg(&source, &output).await?;
            artifacts.push(output);
        }
        Ok(artifacts)
    }

    fn output_path(&self, task: &str, index: usize, ext: &str) -> PathBuf {
        self.output_dir
            .join(artifact_name(task, &index.to_string(), ext))
    }
}

/// Navigate and return the rendered markup with the final page URL.
async fn render(session: &mut dyn PageSession, url: &str) -> Result<(String, Url)> {
    session.goto(url).await?;
    let html = session.content().await?;
    let current = session.current_url().await?;
    let base = Url::parse(&current)
        .map_err(|e| PipelineError::network(&current, format!("invalid page URL: {}", e)))?;
    Ok((html, base))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::filesystem(path, e))?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
