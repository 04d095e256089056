use std::fmt;

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

/// Severity grades for findings, ordered most to least urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    /// Lower rank is more urgent. Used for "at or above" ticket filtering.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn colorized(&self) -> ColoredString {
        match self {
            Severity::Critical => self.as_str().red().bold(),
            Severity::High => self.as_str().red(),
            Severity::Medium => self.as_str().yellow(),
            Severity::Low => self.as_str().normal(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six diagnostic domains a scan can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Cpu,
    Memory,
    Disk,
    Storage,
    Network,
    Database,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Cpu => "CPU",
            Domain::Memory => "Memory",
            Domain::Disk => "Disk",
            Domain::Storage => "Storage",
            Domain::Network => "Network",
            Domain::Database => "Database",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampled value on its way to the threshold evaluator. Metrics are
/// ephemeral; only the findings they trigger survive into the report.
#[derive(Debug, Clone)]
pub struct Metric {
    pub domain: Domain,
    pub name: &'static str,
    pub value: f64,
    /// Display unit: "%", "s", or "" for bare counts and flags.
    pub unit: &'static str,
    pub source_tool: String,
    /// What the sample is about (mount point, pool, volume group, device).
    pub subject: Option<String>,
    /// Override for the observed-value display, e.g. a pool health word.
    pub observed: Option<String>,
}

impl Metric {
    pub fn new(
        domain: Domain,
        name: &'static str,
        value: f64,
        unit: &'static str,
        source_tool: &str,
    ) -> Self {
        Metric {
            domain,
            name,
            value,
            unit,
            source_tool: source_tool.to_string(),
            subject: None,
            observed: None,
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn observed(mut self, observed: impl Into<String>) -> Self {
        self.observed = Some(observed.into());
        self
    }
}

/// A threshold breach worth reporting. Field values are already formatted
/// for display so the report layer never needs the raw sample back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Domain,
    pub description: String,
    pub current: String,
    pub threshold: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: current {}, threshold {}",
            self.severity, self.description, self.current, self.threshold
        )
    }
}
