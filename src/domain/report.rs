use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::finding::{Finding, Severity};

/// Host identification block carried at the top of every report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
}

/// The outcome of one scan: deduplicated findings in emission order plus
/// the summary header. Severity grouping happens at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub summary: SystemSummary,
    pub findings: Vec<Finding>,
    pub elapsed_secs: f64,
}

impl Report {
    pub fn is_healthy(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn bucket(&self, severity: Severity) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect()
    }
}

/// Collapse the raw findings stream into a report. Identical findings (same
/// severity, domain, description and observed value) are reported once, in
/// first-seen order.
pub fn summarize(findings: Vec<Finding>, summary: SystemSummary, elapsed: Duration) -> Report {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(findings.len());
    for finding in findings {
        let key = (
            finding.severity,
            finding.category,
            finding.description.clone(),
            finding.current.clone(),
        );
        if seen.insert(key) {
            unique.push(finding);
        }
    }
    Report {
        summary,
        findings: unique,
        elapsed_secs: elapsed.as_secs_f64(),
    }
}

/// On-disk envelope around a report: checksum, capture time and the scanner
/// version that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReport {
    pub checksum: String,
    pub collected_at: DateTime<Utc>,
    pub scanner_version: String,
    pub report: Report,
}

impl StoredReport {
    pub fn new(report: Report) -> Self {
        let checksum = Self::checksum_of(&report);
        StoredReport {
            checksum,
            collected_at: Utc::now(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
            report,
        }
    }

    fn checksum_of(report: &Report) -> String {
        let serialized = serde_json::to_string(report).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("sha256:{:x}", hasher.finalize())
    }

    pub fn verify(&self) -> bool {
        Self::checksum_of(&self.report) == self.checksum
    }

    /// Write atomically: serialize to a sibling temp file, then rename over.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &content)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move report into {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let stored: StoredReport =
            serde_json::from_str(&content).context("failed to parse stored report")?;
        if !stored.verify() {
            bail!("report checksum mismatch in {}", path.display());
        }
        Ok(stored)
    }
}
