// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use slog::Drain;

/// How log records are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, colorless text meant for a terminal
    Human,
    /// Bunyan-formatted json, one record per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            x => Err(format!("invalid log format: {x}")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn async_root<D>(name: &'static str, drain: D) -> slog::Logger
where
    D: Drain<Ok = ()> + Send + 'static,
    D::Err: std::fmt::Debug,
{
    let drain = slog_async::Async::new(drain.fuse())
        .chan_size(0x2000)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!("name" => name))
}

/// Build the root logger for a process.  Records go to `log_file` if one is
/// provided, and to stdout otherwise.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let writer: Box<dyn Write + Send> = match log_file {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    anyhow::anyhow!("failed to open log file {path}: {e}")
                })?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let log = match log_format {
        LogFormat::Human => {
            let decorator = slog_term::PlainSyncDecorator::new(writer);
            async_root(name, slog_term::FullFormat::new(decorator).build())
        }
        LogFormat::Json => {
            async_root(name, slog_bunyan::with_name(name, writer).build())
        }
    };
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() -> anyhow::Result<()> {
        assert_eq!(LogFormat::from_str("human").unwrap(), LogFormat::Human);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("xml").is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
        Ok(())
    }

    #[test]
    fn test_init_stdout() -> anyhow::Result<()> {
        let log = init("test", &None, LogFormat::Human)?;
        slog::info!(log, "logger is alive");
        Ok(())
    }
}
