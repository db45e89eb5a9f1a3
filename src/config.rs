//! Configuration management for health-situation using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Environment variable naming the remote browser endpoint.
pub const BROWSER_URL_ENV: &str = "BROWSER_URL";

/// Directory for downloaded source documents.
pub const SOURCE_DIR_NAME: &str = "health-situation.src.d";

/// Directory for produced image artifacts.
pub const OUTPUT_DIR_NAME: &str = "health-situation.dst.d";

/// Report template rendered after all tasks.
pub const REPORT_TEMPLATE_NAME: &str = "health-situation.html";

/// Aggregate report written by the renderer.
pub const REPORT_OUTPUT_NAME: &str = "health-situation.pdf";

/// Names or paths of the external programs the pipeline drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ToolPaths {
    #[serde(default = "default_pdftotext")]
    #[prefer(default = "pdftotext")]
    pub pdftotext: String,
    #[serde(default = "default_pdftocairo")]
    #[prefer(default = "pdftocairo")]
    pub pdftocairo: String,
    #[serde(default = "default_prince")]
    #[prefer(default = "prince")]
    pub prince: String,
}

fn default_pdftotext() -> String {
    "pdftotext".to_string()
}

fn default_pdftocairo() -> String {
    "pdftocairo".to_string()
}

fn default_prince() -> String {
    "prince".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pdftotext: default_pdftotext(),
            pdftocairo: default_pdftocairo(),
            prince: default_prince(),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base working directory.
    pub work_dir: PathBuf,
    /// Directory for downloaded source documents.
    pub source_dir: PathBuf,
    /// Directory for produced images.
    pub output_dir: PathBuf,
    /// Remote browser endpoint (ws:// or http:// DevTools address).
    pub browser_url: Option<String>,
    /// Skip certificate verification when connecting to the browser endpoint.
    pub accept_invalid_certs: bool,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Catalog file replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// HTML template for the aggregate report.
    pub report_template: PathBuf,
    /// Rendered report path.
    pub report_output: PathBuf,
    /// External program locations.
    pub tools: ToolPaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_work_dir(PathBuf::from("."))
    }
}

impl Settings {
    /// Create settings rooted at a custom working directory.
    pub fn with_work_dir(work_dir: PathBuf) -> Self {
        Self {
            source_dir: work_dir.join(SOURCE_DIR_NAME),
            output_dir: work_dir.join(OUTPUT_DIR_NAME),
            report_template: work_dir.join(REPORT_TEMPLATE_NAME),
            report_output: work_dir.join(REPORT_OUTPUT_NAME),
            work_dir,
            browser_url: None,
            accept_invalid_certs: true,
            user_agent: concat!("health-situation/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: 30,
            catalog_path: None,
            tools: ToolPaths::default(),
        }
    }

    /// Ensure the working directories exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.source_dir, &self.output_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::filesystem(dir, e))?;
        }
        Ok(())
    }

    /// The browser endpoint, or a configuration error if none was given.
    pub fn require_browser_url(&self) -> Result<&str> {
        self.browser_url.as_deref().ok_or_else(|| {
            PipelineError::Config(format!(
                "no remote browser endpoint configured (set {})",
                BROWSER_URL_ENV
            ))
        })
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Working directory for source and output artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Remote browser endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
    /// Skip certificate verification for the browser endpoint only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_invalid_certs: Option<bool>,
    /// User agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Catalog file (TOML) replacing the built-in catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Report template path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_template: Option<String>,
    /// Report output path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_output: Option<String>,
    /// External tool overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolPaths>,

    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers health-situation config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("health-situation").await {
            Ok(pref_config) => {
                let work_dir: Option<String> = pref_config.get("work_dir").ok();
                let browser_url: Option<String> = pref_config.get("browser_url").ok();
                let accept_invalid_certs: Option<bool> =
                    pref_config.get("accept_invalid_certs").ok();
                let user_agent: Option<String> = pref_config.get("user_agent").ok();
                let request_timeout: Option<u64> = pref_config.get("request_timeout").ok();
                let catalog: Option<String> = pref_config.get("catalog").ok();
                let report_template: Option<String> =
                    pref_config.get("report_template").ok();
                let report_output: Option<String> = pref_config.get("report_output").ok();
                let tools: Option<ToolPaths> = pref_config.get("tools").ok();

                let source_path = pref_config.source_path().cloned();

                Config {
                    work_dir,
                    browser_url,
                    accept_invalid_certs,
                    user_agent,
                    request_timeout,
                    catalog,
                    report_template,
                    report_output,
                    tools,
                    source_path,
                }
            }
            // No config file found, use defaults
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::filesystem(path, e))?;

        let mut config: Config = serde_json::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("failed to parse config file: {}", e)))?;

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref work_dir) = self.work_dir {
            let tools = settings.tools.clone();
            *settings = Settings::with_work_dir(self.resolve_path(work_dir, base_dir));
            settings.tools = tools;
        }
        if let Some(ref url) = self.browser_url {
            settings.browser_url = Some(url.clone());
        }
        if let Some(accept) = self.accept_invalid_certs {
            settings.accept_invalid_certs = accept;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref catalog) = self.catalog {
            settings.catalog_path = Some(self.resolve_path(catalog, base_dir));
        }
        if let Some(ref template) = self.report_template {
            settings.report_template = self.resolve_path(template, base_dir);
        }
        if let Some(ref output) = self.report_output {
            settings.report_output = self.resolve_path(output, base_dir);
        }
        if let Some(ref tools) = self.tools {
            settings.tools = tools.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Browser endpoint from the command line or environment.
    pub browser_url: Option<String>,
}

/// Load settings with explicit options.
///
/// Precedence, lowest first: defaults, config file, `BROWSER_URL`/flag.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings> {
    let config = match &options.config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    // Relative paths resolve against the config file's directory, falling back to CWD
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    config.apply_to_settings(&mut settings, &base_dir);

    let env_url = std::env::var(BROWSER_URL_ENV).ok().filter(|v| !v.is_empty());
    if let Some(url) = options.browser_url.or(env_url) {
        settings.browser_url = Some(url);
    }

    Ok(settings)
}

/// Load a `.env` file into the process environment.
///
/// Returns `Ok(false)` when the file does not exist.
pub fn load_dotenv_file(path: &Path) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(PipelineError::Config(format!(
            "failed to load {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_layout() {
        let settings = Settings::with_work_dir(PathBuf::from("/data"));
        assert_eq!(
            settings.source_dir,
            PathBuf::from("/data/health-situation.src.d")
        );
        assert_eq!(
            settings.output_dir,
            PathBuf::from("/data/health-situation.dst.d")
        );
        assert_eq!(
            settings.report_output,
            PathBuf::from("/data/health-situation.pdf")
        );
        assert!(settings.accept_invalid_certs);
        assert_eq!(settings.tools.pdftocairo, "pdftocairo");
    }

    #[test]
    fn test_apply_to_settings() {
        let config = Config {
            work_dir: Some("run".to_string()),
            browser_url: Some("ws://browser:3000".to_string()),
            accept_invalid_certs: Some(false),
            request_timeout: Some(90),
            catalog: Some("/etc/catalog.toml".to_string()),
            ..Default::default()
        };

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/srv"));

        assert_eq!(settings.work_dir, PathBuf::from("/srv/run"));
        assert_eq!(
            settings.output_dir,
            PathBuf::from("/srv/run/health-situation.dst.d")
        );
        assert_eq!(settings.browser_url.as_deref(), Some("ws://browser:3000"));
        assert!(!settings.accept_invalid_certs);
        assert_eq!(settings.request_timeout, 90);
        assert_eq!(
            settings.catalog_path,
            Some(PathBuf::from("/etc/catalog.toml"))
        );
    }

    #[test]
    fn test_require_browser_url() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.require_browser_url(),
            Err(PipelineError::Config(_))
        ));
        settings.browser_url = Some("ws://localhost:9222".to_string());
        assert_eq!(settings.require_browser_url().unwrap(), "ws://localhost:9222");
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_work_dir(dir.path().to_path_buf());
        settings.ensure_directories().unwrap();
        assert!(settings.source_dir.is_dir());
        assert!(settings.output_dir.is_dir());
        // Idempotent
        settings.ensure_directories().unwrap();
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health-situation.json");
        std::fs::write(
            &path,
            r#"{ "browser_url": "wss://chrome.example.org", "tools": { "prince": "/opt/prince/bin/prince" } }"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));

        let tools = config.tools.clone().unwrap();
        assert_eq!(tools.prince, "/opt/prince/bin/prince");
        assert_eq!(tools.pdftotext, "pdftotext");

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(
            settings.browser_url.as_deref(),
            Some("wss://chrome.example.org")
        );
    }

    #[test]
    fn test_missing_dotenv_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_dotenv_file(&dir.path().join(".env")).unwrap();
        assert!(!loaded);
    }

    #[test]
    fn test_malformed_dotenv_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "HEALTH_SITUATION_UNTERMINATED='no closing quote\n").unwrap();

        let err = load_dotenv_file(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref m) if m.contains(".env")));
    }

    #[test]
    fn test_dotenv_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "HEALTH_SITUATION_DOTENV_CHECK=loaded\n").unwrap();

        assert!(load_dotenv_file(&path).unwrap());
        assert_eq!(
            std::env::var("HEALTH_SITUATION_DOTENV_CHECK").as_deref(),
            Ok("loaded")
        );
    }
}
