//! Aggregate report rendering.
//!
//! The HTML template references the produced artifacts by relative path and
//! is rendered to PDF by `prince`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::tools::ExternalTool;

/// Final step of a successful run.
#[async_trait]
pub trait Composer: Send + Sync {
    /// Produce the report and return its path.
    async fn compose(&self) -> Result<PathBuf>;
}

/// Renders the HTML template with Prince.
#[derive(Debug, Clone)]
pub struct ReportComposer {
    renderer: ExternalTool,
    template: PathBuf,
    output: PathBuf,
}

impl ReportComposer {
    pub fn new(renderer: ExternalTool, template: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            template: template.into(),
            output: output.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            ExternalTool::new("prince", &settings.tools.prince),
            &settings.report_template,
            &settings.report_output,
        )
    }

    /// Local image references in the template that do not exist on disk.
    pub async fn missing_artifacts(&self) -> Result<Vec<PathBuf>> {
        let html = tokio::fs::read_to_string(&self.template)
            .await
            .map_err(|e| PipelineError::filesystem(&self.template, e))?;
        let base = self.template.parent().unwrap_or_else(|| Path::new("."));

        let mut missing = Vec::new();
        for reference in referenced_artifacts(&html) {
            let path = base.join(&reference);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                missing.push(path);
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl Composer for ReportComposer {
    async fn compose(&self) -> Result<PathBuf> {
        info!("Rendering report {}", self.output.display());

        for path in self.missing_artifacts().await? {
            warn!("Report references missing artifact {}", path.display());
        }

        self.renderer
            .run(prince_args(&self.template, &self.output))
            .await?;

        info!("Report written to {}", self.output.display());
        Ok(self.output.clone())
    }
}

/// Relative `img[src]` references in document order. Remote and inline
/// sources are skipped.
pub fn referenced_artifacts(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| !src.contains("://") && !src.starts_with("data:"))
        .map(str::to_string)
        .collect()
}

pub fn prince_args(template: &Path, output: &Path) -> Vec<OsString> {
    vec![
        template.as_os_str().to_owned(),
        OsString::from("-o"),
        output.as_os_str().to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TEMPLATE: &str = r#"<html><body>
        <img src="health-situation.dst.d/divi-1.svg">
        <img src="health-situation.dst.d/divi-2.svg">
        <img src="https://example.org/logo.png">
        <img src="data:image/png;base64,AAAA">
    </body></html>"#;

    #[test]
    fn test_referenced_artifacts() {
        assert_eq!(
            referenced_artifacts(TEMPLATE),
            vec![
                "health-situation.dst.d/divi-1.svg",
                "health-situation.dst.d/divi-2.svg"
            ]
        );
    }

    #[test]
    fn test_prince_args() {
        let args = prince_args(Path::new("health-situation.html"), Path::new("out.pdf"));
        assert_eq!(args, vec!["health-situation.html", "-o", "out.pdf"]);
    }

    #[tokio::test]
    async fn test_missing_artifacts() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("health-situation.html");
        fs::write(&template, TEMPLATE).unwrap();
        fs::create_dir(dir.path().join("health-situation.dst.d")).unwrap();
        fs::write(dir.path().join("health-situation.dst.d/divi-1.svg"), "<svg/>").unwrap();

        let composer = ReportComposer::new(
            ExternalTool::new("prince", "prince"),
            &template,
            dir.path().join("out.pdf"),
        );
        let missing = composer.missing_artifacts().await.unwrap();
        assert_eq!(missing, vec![dir.path().join("health-situation.dst.d/divi-2.svg")]);
    }

    #[tokio::test]
    async fn test_missing_template_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let composer = ReportComposer::new(
            ExternalTool::new("prince", "prince"),
            dir.path().join("nope.html"),
            dir.path().join("out.pdf"),
        );
        assert!(matches!(
            composer.compose().await,
            Err(PipelineError::Filesystem { .. })
        ));
    }
}
