//! Error types shared by every pipeline stage.

use std::path::PathBuf;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can abort a scraping task.
///
/// None of these are handled locally: a task lets them propagate to the
/// orchestrator, which closes the browser session and stops the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fetch or navigation failed (unreachable host, bad status, timeout).
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    /// A locator pattern matched nothing in the page or document.
    #[error("{what} not found: no match for {pattern}")]
    NotFound { what: String, pattern: String },

    /// An external program was missing or exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// Reading or writing a working artifact failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The DevTools connection or a page command failed.
    #[error("browser error: {0}")]
    Browser(String),

    /// The task catalog is malformed.
    #[error("invalid catalog: {0}")]
    Catalog(String),

    /// Settings could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            pattern: pattern.into(),
        }
    }

    pub fn external_tool(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short kind name, used in logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::NotFound { .. } => "not_found",
            Self::ExternalTool { .. } => "external_tool",
            Self::Filesystem { .. } => "filesystem",
            Self::Browser(_) => "browser",
            Self::Catalog(_) => "catalog",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::not_found("anchor 'curve'", "Abbildung 2:");
        assert_eq!(
            err.to_string(),
            "anchor 'curve' not found: no match for Abbildung 2:"
        );
        assert_eq!(err.kind(), "not_found");

        let err = PipelineError::network("https://example.org/a.pdf", "status 404");
        assert!(err.to_string().contains("https://example.org/a.pdf"));
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn test_filesystem_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = PipelineError::filesystem("/tmp/out.svg", io);
        assert!(err.to_string().contains("/tmp/out.svg"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
