//! Build and enrich progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts. The
//! human form is one line per event; the JSON form is one object per line.

use std::io::Write;

use clap::ValueEnum;
use serde::Serialize;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Registry discovery has started; no counts yet.
    Scanning { registry: String },
    /// Records written so far by the batch indexer.
    Indexing {
        registry: String,
        records: u64,
        batches: u64,
    },
    /// Documents visited by an enrichment run, out of the groups found.
    Enriching {
        source: String,
        target: String,
        visited: u64,
        found: u64,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// `build pypi  indexing  1,234 records (13 batches)`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning { registry } => format!("build {}  scanning...\n", registry),
            ProgressEvent::Indexing {
                registry,
                records,
                batches,
            } => format!(
                "build {}  indexing  {} records ({} batches)\n",
                registry,
                format_number(*records),
                format_number(*batches)
            ),
            ProgressEvent::Enriching {
                source,
                target,
                visited,
                found,
            } => format!(
                "enrich {} -> {}  {} / {} packages\n",
                source,
                target,
                format_number(*visited),
                format_number(*found)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let mut obj = serde_json::to_value(&event).unwrap_or_default();
        if let Some(map) = obj.as_object_mut() {
            map.insert("event".into(), "progress".into());
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
