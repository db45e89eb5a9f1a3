//! External program invocation.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{PipelineError, Result};

/// A command-line program located on `PATH` (or given as a path).
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: String,
    program: String,
}

impl ExternalTool {
    /// `name` is used in errors and logs, `program` is a binary name or path.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }

    /// Resolve the program to an executable path.
    pub fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| {
            PipelineError::external_tool(
                &self.name,
                format!("{} not found on PATH: {}", self.program, e),
            )
        })
    }

    /// Run to completion, returning stdout. Non-zero exit is an error
    /// carrying the tail of stderr.
    pub async fn run<I, S>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let program = self.resolve()?;
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        debug!(
            "{} {}",
            program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = tokio::process::Command::new(&program)
            .args(&args)
            .output()
            .await
            .map_err(|e| PipelineError::external_tool(&self.name, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::external_tool(
                &self.name,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(output.stdout)
    }
}
