//! GitHub Actions plumbing
//!
//! Outputs are appended to the file named by `GITHUB_OUTPUT`; failures are
//! reported with an `::error::` workflow command.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Destination of run outputs
pub trait OutputSink {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Writes outputs the way the Actions runner expects them
#[derive(Debug, Clone, Default)]
pub struct GithubOutput {
    /// `None` prints `name=value` lines to stdout instead
    path: Option<PathBuf>,
}

impl GithubOutput {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl OutputSink for GithubOutput {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        tracing::info!("Output {}={}", name, value);
        let line = format_output(name, value);

        let Some(path) = &self.path else {
            print!("{}", line);
            return Ok(());
        };

        let io_error = |source| Error::Io {
            path: path.clone(),
            source,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)
    }
}

/// Keeps outputs in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryOutputs {
    pub values: BTreeMap<String, String>,
}

impl MemoryOutputs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl OutputSink for MemoryOutputs {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// One entry of the output file. Multi-line values use the heredoc form.
pub fn format_output(name: &str, value: &str) -> String {
    if value.contains('\n') || value.contains('\r') {
        let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
        format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
    } else {
        format!("{name}={value}\n")
    }
}

/// Workflow command that marks the step as failed in the run log
pub fn error_command(message: &str) -> String {
    let escaped = message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A");
    format!("::error::{}", escaped)
}
