//! Metric collectors, one implementation per diagnostic domain and platform
//! family. The factory in [`build`] is the only place that maps a (family,
//! domain) pair to concrete code; everything downstream works through the
//! [`Collector`] trait.

pub mod cpu;
pub mod database;
pub mod disk;
pub mod memory;
pub mod network;
pub mod storage;

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::domain::finding::{Domain, Finding, Metric};
use crate::domain::thresholds::ThresholdTable;
use crate::errors::CollectError;
use crate::platform::{OsFamily, PlatformProfile};
use crate::tools::{Resolution, ToolResolver};
use crate::transcript::Transcript;

/// What a scan covers. The focused modes exist for re-checking a single
/// domain after remediation without sitting through a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScanMode {
    /// CPU and memory only
    Quick,
    /// All six domains
    Full,
    /// All six domains plus the disk throughput benchmark
    Deep,
    Cpu,
    Memory,
    Disk,
    Storage,
    Network,
    Database,
}

impl ScanMode {
    pub fn domains(&self) -> &'static [Domain] {
        match self {
            ScanMode::Quick => &[Domain::Cpu, Domain::Memory],
            ScanMode::Full | ScanMode::Deep => &[
                Domain::Cpu,
                Domain::Memory,
                Domain::Disk,
                Domain::Storage,
                Domain::Network,
                Domain::Database,
            ],
            ScanMode::Cpu => &[Domain::Cpu],
            ScanMode::Memory => &[Domain::Memory],
            ScanMode::Disk => &[Domain::Disk],
            ScanMode::Storage => &[Domain::Storage],
            ScanMode::Network => &[Domain::Network],
            ScanMode::Database => &[Domain::Database],
        }
    }

    pub fn is_deep(&self) -> bool {
        matches!(self, ScanMode::Deep)
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanMode::Quick => "quick",
            ScanMode::Full => "full",
            ScanMode::Deep => "deep",
            ScanMode::Cpu => "cpu",
            ScanMode::Memory => "memory",
            ScanMode::Disk => "disk",
            ScanMode::Storage => "storage",
            ScanMode::Network => "network",
            ScanMode::Database => "database",
        };
        f.write_str(name)
    }
}

/// Shared state for one scan run. Threaded explicitly through every
/// collector; there is no global accumulator.
pub struct ScanContext<'a> {
    pub profile: &'a PlatformProfile,
    pub tools: &'a ToolResolver,
    pub thresholds: &'a ThresholdTable,
    pub transcript: &'a mut Transcript,
    pub deep: bool,
    pub output_dir: &'a Path,
    pub findings: Vec<Finding>,
}

impl ScanContext<'_> {
    pub fn family(&self) -> OsFamily {
        self.profile.os_family
    }

    /// Resolve a logical tool name to the concrete command for this host.
    pub fn tool(&self, logical: &str) -> Result<String, CollectError> {
        match self.tools.resolve(logical) {
            Resolution::Command(cmd) => Ok(cmd),
            Resolution::Unavailable => Err(CollectError::ToolUnavailable(logical.to_string())),
        }
    }

    /// Run a metric through the threshold table, keeping any finding.
    pub fn record(&mut self, metric: Metric) {
        debug!(
            domain = metric.domain.as_str(),
            name = metric.name,
            value = metric.value,
            tool = %metric.source_tool,
            "metric sampled"
        );
        if let Some(finding) = self.thresholds.evaluate(&metric) {
            self.transcript.warn(format!("bottleneck: {finding}"));
            self.findings.push(finding);
        }
    }

    /// A check could not run or could not be parsed. Log and move on; this
    /// is the only treatment degraded checks ever get.
    pub fn skip(&mut self, what: &str, err: &CollectError) {
        self.transcript.warn(format!("skipping {what}: {err}"));
    }
}

pub trait Collector {
    fn domain(&self) -> Domain;
    fn collect(&self, cx: &mut ScanContext<'_>);
}

/// Instantiate the collector for a (platform family, domain) pair. `None`
/// means the pair has no meaningful checks (volume managers on a generic
/// Linux box, anything on an unclassified host).
pub fn build(family: OsFamily, domain: Domain) -> Option<Box<dyn Collector>> {
    if family == OsFamily::Unknown {
        return None;
    }
    match (domain, family) {
        (Domain::Cpu, OsFamily::Aix) => Some(Box::new(cpu::AixCpu)),
        (Domain::Cpu, OsFamily::HpUx) => Some(Box::new(cpu::HpuxCpu)),
        (Domain::Cpu, OsFamily::Solaris) => Some(Box::new(cpu::SolarisCpu)),
        (Domain::Cpu, OsFamily::Linux) => Some(Box::new(cpu::LinuxCpu)),
        (Domain::Memory, OsFamily::Aix) => Some(Box::new(memory::AixMemory)),
        (Domain::Memory, OsFamily::HpUx) => Some(Box::new(memory::HpuxMemory)),
        (Domain::Memory, OsFamily::Solaris) => Some(Box::new(memory::SolarisMemory)),
        (Domain::Memory, OsFamily::Linux) => Some(Box::new(memory::LinuxMemory)),
        (Domain::Disk, OsFamily::Aix) => Some(Box::new(disk::AixDisk)),
        (Domain::Disk, OsFamily::HpUx) => Some(Box::new(disk::HpuxDisk)),
        (Domain::Disk, OsFamily::Solaris) => Some(Box::new(disk::SolarisDisk)),
        (Domain::Disk, OsFamily::Linux) => Some(Box::new(disk::LinuxDisk)),
        (Domain::Storage, OsFamily::Aix) => Some(Box::new(storage::AixStorage)),
        (Domain::Storage, OsFamily::HpUx) => Some(Box::new(storage::HpuxStorage)),
        (Domain::Storage, OsFamily::Solaris) => Some(Box::new(storage::SolarisStorage)),
        (Domain::Storage, OsFamily::Linux) => None,
        (Domain::Network, OsFamily::Aix) => Some(Box::new(network::AixNetwork)),
        (Domain::Network, OsFamily::HpUx) => Some(Box::new(network::HpuxNetwork)),
        (Domain::Network, OsFamily::Solaris) => Some(Box::new(network::SolarisNetwork)),
        (Domain::Network, OsFamily::Linux) => Some(Box::new(network::LinuxNetwork)),
        (Domain::Database, _) => Some(Box::new(database::DatabaseProbe)),
        (_, OsFamily::Unknown) => None,
    }
}

/// Run a diagnostic command and hand back stdout. Failure to spawn reads as
/// the tool being unavailable; a non-zero exit with nothing on stdout reads
/// as a failed command. Non-zero exits that still produced output are used
/// as-is, since several legacy tools exit dirty on partial permission.
/// Stdin is closed so a tool that turns interactive cannot stall the scan.
pub fn run_tool(command: &str, args: &[&str]) -> Result<String, CollectError> {
    debug!(command, ?args, "running");
    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|_| CollectError::ToolUnavailable(command.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() && !output.status.success() {
        return Err(CollectError::CommandFailed(command.to_string()));
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PackageManager;

    fn solaris_profile() -> PlatformProfile {
        PlatformProfile {
            os_family: OsFamily::Solaris,
            distro_id: "solaris11".into(),
            os_version: "11.4".into(),
            os_version_major: 11,
            variant: Some("Oracle Solaris 11.4 X86".into()),
            package_manager: PackageManager::Ips,
        }
    }

    #[test]
    fn quick_mode_covers_only_cpu_and_memory() {
        let domains = ScanMode::Quick.domains();
        assert_eq!(domains, &[Domain::Cpu, Domain::Memory]);
        assert!(!domains.contains(&Domain::Disk));
        assert!(!domains.contains(&Domain::Database));
    }

    #[test]
    fn full_and_deep_cover_all_domains() {
        assert_eq!(ScanMode::Full.domains().len(), 6);
        assert_eq!(ScanMode::Deep.domains(), ScanMode::Full.domains());
        assert!(ScanMode::Deep.is_deep());
        assert!(!ScanMode::Full.is_deep());
    }

    #[test]
    fn factory_skips_unknown_hosts_and_linux_volume_managers() {
        assert!(build(OsFamily::Unknown, Domain::Cpu).is_none());
        assert!(build(OsFamily::Linux, Domain::Storage).is_none());
        assert!(build(OsFamily::Solaris, Domain::Storage).is_some());
    }

    #[test]
    fn factory_covers_every_supported_pair() {
        for family in [OsFamily::Aix, OsFamily::HpUx, OsFamily::Solaris, OsFamily::Linux] {
            for domain in ScanMode::Full.domains() {
                let expected_absent =
                    family == OsFamily::Linux && *domain == Domain::Storage;
                assert_eq!(build(family, *domain).is_none(), expected_absent);
            }
        }
    }

    #[test]
    fn degraded_tool_pool_yields_empty_findings_not_errors() {
        let profile = solaris_profile();
        let resolver = ToolResolver::with_probe(OsFamily::Solaris, Box::new(|_| false));
        let thresholds = ThresholdTable::builtin();
        let dir = tempfile::tempdir().unwrap();
        let mut transcript =
            Transcript::to_file(&dir.path().join("scan.log")).unwrap();
        let mut cx = ScanContext {
            profile: &profile,
            tools: &resolver,
            thresholds: &thresholds,
            transcript: &mut transcript,
            deep: false,
            output_dir: dir.path(),
            findings: Vec::new(),
        };
        for domain in ScanMode::Full.domains() {
            if let Some(collector) = build(OsFamily::Solaris, *domain) {
                collector.collect(&mut cx);
            }
        }
        assert!(cx.findings.is_empty());
    }
}
