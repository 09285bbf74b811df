//! Experiment-tracking sinks.
//!
//! A record is a flat map of `"<phase>/<metric>"` keys to values, published
//! together with the iteration it belongs to.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use classif_core::{DashboardConfig, DashboardKind, Error, Result};
use serde::Serialize;
use tracing::{debug, info};

pub type DashboardRecord = BTreeMap<String, f64>;

pub trait Dashboard {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()>;
}

impl<D: Dashboard + ?Sized> Dashboard for Box<D> {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()> {
        (**self).log(record, step)
    }
}

/// Discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDashboard;

impl Dashboard for NullDashboard {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()> {
        debug!(step, entries = record.len(), "Dropping dashboard record");
        Ok(())
    }
}

/// Keeps records in memory.
///
/// Clones share the same storage, so a handle kept by the caller sees what
/// the classifier logged.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDashboard {
    entries: Arc<Mutex<Vec<(usize, DashboardRecord)>>>,
}

impl InMemoryDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(usize, DashboardRecord)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Entries holding at least one key of `phase`
    pub fn phase_entries(&self, phase: &str) -> Vec<(usize, DashboardRecord)> {
        let prefix = format!("{}/", phase);
        self.entries()
            .into_iter()
            .filter(|(_, record)| record.keys().any(|key| key.starts_with(&prefix)))
            .collect()
    }
}

impl Dashboard for InMemoryDashboard {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Dashboard("In-memory dashboard lock poisoned".to_string()))?
            .push((step, record.clone()));
        Ok(())
    }
}

#[derive(Serialize)]
struct Entry<'a> {
    step: usize,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<&'a str>,
    values: &'a DashboardRecord,
}

impl<'a> Entry<'a> {
    fn new(record: &'a DashboardRecord, step: usize, run: Option<&'a str>) -> Self {
        Self {
            step,
            timestamp: chrono::Utc::now().to_rfc3339(),
            run,
            values: record,
        }
    }
}

/// Appends one JSON object per record to a file
pub struct JsonlDashboard {
    writer: BufWriter<File>,
    run_name: Option<String>,
}

impl JsonlDashboard {
    pub fn create(path: &Path, run_name: Option<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Logging metrics to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            run_name,
        })
    }
}

impl Dashboard for JsonlDashboard {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()> {
        let entry = Entry::new(record, step, self.run_name.as_deref());
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// POSTs every record as JSON to a tracking server
pub struct HttpDashboard {
    client: reqwest::blocking::Client,
    endpoint: String,
    run_name: Option<String>,
}

impl HttpDashboard {
    pub fn new(endpoint: &str, run_name: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Dashboard(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            run_name,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Dashboard for HttpDashboard {
    fn log(&mut self, record: &DashboardRecord, step: usize) -> Result<()> {
        let entry = Entry::new(record, step, self.run_name.as_deref());
        self.client
            .post(&self.endpoint)
            .json(&entry)
            .send()
            .map_err(|e| Error::Dashboard(format!("Request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Dashboard(format!("Dashboard rejected record: {}", e)))?;
        Ok(())
    }
}

/// Builds the sink selected by `config`
pub fn build_dashboard(config: &DashboardConfig) -> Result<Box<dyn Dashboard>> {
    config.validate()?;
    let run_name = config.run_name.clone();
    match config.kind {
        DashboardKind::None => Ok(Box::new(NullDashboard)),
        DashboardKind::Jsonl => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| Error::Config("jsonl dashboard requires a path".to_string()))?;
            Ok(Box::new(JsonlDashboard::create(path, run_name)?))
        }
        DashboardKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::Config("http dashboard requires an endpoint".to_string()))?;
            Ok(Box::new(HttpDashboard::new(endpoint, run_name)?))
        }
    }
}
