//! Output handling with stdout/stderr separation contract
//!
//! Commands write machine-readable results (JSON or YAML) or human-readable
//! text to stdout through [`Output`]; every diagnostic, progress note, or
//! warning goes to stderr via `tracing` instead. Mixing the two streams
//! would break scripted consumption of `forge build --output json`.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};

/// Output helper enforcing the stdout/stderr separation contract.
pub struct Output {
    writer: Box<dyn Write>,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create an output helper writing to the real stdout.
    pub fn new() -> Self {
        Self {
            writer: Box::new(io::stdout()),
        }
    }

    /// Write a value as pretty-printed JSON.
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let rendered = serde_json::to_string_pretty(value)?;
        self.write_line(&rendered)
    }

    /// Write a value as YAML.
    pub fn write_yaml<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let rendered = serde_yaml::to_string(value)?;
        write!(self.writer, "{rendered}")?;
        Ok(())
    }

    /// Write a single line of human-readable text.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        writeln!(self.writer, "{text}")?;
        Ok(())
    }

    /// Write multiple lines of human-readable text.
    pub fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        for line in lines {
            self.write_line(line)?;
        }
        Ok(())
    }

    /// Flush any buffered output.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// The format a command should render its result in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            other => anyhow::bail!("unknown output format `{other}`, expected text|json|yaml"),
        }
    }
}
