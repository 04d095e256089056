//! Platform detection for the Unix flavors this scanner targets.
//!
//! Classification runs on a fixed set of host signals gathered up front, so
//! the decision logic itself never touches the filesystem and can be tested
//! against canned signal sets. The probe order matters: a Solaris release
//! marker without Linux's /proc/cpuinfo outranks whatever uname says, which
//! keeps minimal illumos zones from being misfiled.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DetectError;
use crate::tools;
use crate::transcript::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Aix,
    HpUx,
    Solaris,
    Linux,
    Unknown,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Aix => "AIX",
            OsFamily::HpUx => "HP-UX",
            OsFamily::Solaris => "Solaris",
            OsFamily::Linux => "Linux",
            OsFamily::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Ips,
    Pkgutil,
    Pkgadd,
    Dnf,
    Yum,
    Installp,
    Swinstall,
    AptGet,
    Zypper,
    Manual,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackageManager::Ips => "pkg (IPS)",
            PackageManager::Pkgutil => "pkgutil (OpenCSW)",
            PackageManager::Pkgadd => "pkgadd",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Installp => "installp",
            PackageManager::Swinstall => "swinstall (SD-UX)",
            PackageManager::AptGet => "apt-get",
            PackageManager::Zypper => "zypper",
            PackageManager::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Everything downstream code needs to know about the host, resolved once
/// at scan start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub os_family: OsFamily,
    pub distro_id: String,
    pub os_version: String,
    pub os_version_major: u32,
    /// Marketing or technology-level name where the raw version is cryptic
    /// (HP-UX "11i v3", the AIX TL string, the Solaris release banner).
    pub variant: Option<String>,
    pub package_manager: PackageManager,
}

impl PlatformProfile {
    pub fn pretty_name(&self) -> String {
        match self.os_family {
            OsFamily::Aix => {
                let short: Vec<&str> = self.os_version.split('.').take(2).collect();
                format!("AIX {}", short.join("."))
            }
            OsFamily::HpUx => match &self.variant {
                Some(v) => format!("HP-UX {v}"),
                None => format!("HP-UX {}", self.os_version),
            },
            OsFamily::Solaris => match &self.variant {
                Some(v) => v.clone(),
                None => format!("Solaris {}", self.os_version),
            },
            OsFamily::Linux => self.variant.clone().unwrap_or_else(|| "Linux".to_string()),
            OsFamily::Unknown => "Unknown Unix".to_string(),
        }
    }
}

/// Raw evidence gathered from the host before any classification happens.
#[derive(Debug, Clone, Default)]
pub struct HostSignals {
    pub kernel_name: Option<String>,
    pub kernel_release: Option<String>,
    /// `uname -v`; on AIX this is the major version ("7") while `-r`
    /// carries the minor ("2").
    pub kernel_version: Option<String>,
    pub release_file: Option<String>,
    pub os_release_file: Option<String>,
    pub has_cpuinfo: bool,
    pub oslevel: Option<String>,
    pub oslevel_s: Option<String>,
}

impl HostSignals {
    pub fn gather() -> Result<Self, DetectError> {
        let mut signals = HostSignals {
            release_file: fs::read_to_string("/etc/release").ok(),
            os_release_file: fs::read_to_string("/etc/os-release").ok(),
            has_cpuinfo: Path::new("/proc/cpuinfo").exists(),
            ..HostSignals::default()
        };
        match capture("uname", &["-s"]) {
            Ok(name) => {
                signals.kernel_name = Some(name.trim().to_string());
                signals.kernel_release =
                    capture("uname", &["-r"]).ok().map(|r| r.trim().to_string());
                signals.kernel_version =
                    capture("uname", &["-v"]).ok().map(|v| v.trim().to_string());
            }
            Err(err) if signals.release_file.is_none() && signals.os_release_file.is_none() => {
                return Err(DetectError::NoSignals(err));
            }
            Err(err) => debug!(error = %err, "uname unavailable, using marker files"),
        }
        if signals.kernel_name.as_deref() == Some("AIX") {
            signals.oslevel = capture("oslevel", &[]).ok().map(|s| s.trim().to_string());
            signals.oslevel_s = capture("oslevel", &["-s"])
                .ok()
                .map(|s| s.trim().to_string());
        }
        Ok(signals)
    }

    fn has_solaris_marker(&self) -> bool {
        self.release_file.is_some()
            || self
                .kernel_name
                .as_deref()
                .is_some_and(|k| k.starts_with("SunOS"))
    }
}

/// Detect the running platform and log the outcome to the transcript.
pub fn detect(transcript: &mut Transcript) -> Result<PlatformProfile, DetectError> {
    let signals = HostSignals::gather()?;
    debug!(?signals, "host signals");
    let profile = classify(&signals, &|tool| tools::on_path(tool));
    transcript.info(format!(
        "platform: {} [family {}, version {}]",
        profile.pretty_name(),
        profile.os_family,
        profile.os_version
    ));
    if let Some(variant) = &profile.variant {
        transcript.info(format!("variant: {variant}"));
    }
    transcript.info(format!("package manager: {}", profile.package_manager));
    if profile.os_family == OsFamily::Unknown {
        transcript.warn("platform not recognized; platform-specific checks will be skipped");
    }
    Ok(profile)
}

/// Pure classification over gathered signals. `tool_exists` answers whether
/// a named binary is installed, which drives package manager selection.
pub fn classify(signals: &HostSignals, tool_exists: &dyn Fn(&str) -> bool) -> PlatformProfile {
    // A Solaris release marker on a host without Linux's cpuinfo pseudo-file
    // is decisive even when uname is missing or lying.
    if signals.release_file.is_some() && !signals.has_cpuinfo {
        return solaris_profile(signals, tool_exists);
    }
    match signals.kernel_name.as_deref() {
        Some("AIX") => aix_profile(signals, tool_exists),
        Some("HP-UX") => hpux_profile(signals, tool_exists),
        Some(k) if k.starts_with("SunOS") => solaris_profile(signals, tool_exists),
        _ if signals.os_release_file.is_some() => linux_profile(signals, tool_exists),
        // Unidentified host that still carries a Solaris marker: trust the
        // marker rather than reporting Unknown.
        _ if signals.has_solaris_marker() => solaris_profile(signals, tool_exists),
        _ => PlatformProfile {
            os_family: OsFamily::Unknown,
            distro_id: "unknown".to_string(),
            os_version: "unknown".to_string(),
            os_version_major: 0,
            variant: None,
            package_manager: PackageManager::Manual,
        },
    }
}

fn solaris_profile(signals: &HostSignals, tool_exists: &dyn Fn(&str) -> bool) -> PlatformProfile {
    let release = signals.release_file.as_deref().unwrap_or("");
    let lowered = release.to_lowercase();
    let distro_id = if lowered.contains("openindiana") {
        "openindiana"
    } else if lowered.contains("omnios") {
        "omnios"
    } else if lowered.contains("smartos") {
        "smartos"
    } else if lowered.contains("illumos") {
        "illumos"
    } else if lowered.contains("solaris 11") {
        "solaris11"
    } else if lowered.contains("solaris 10") {
        "solaris10"
    } else {
        match signals.kernel_release.as_deref() {
            Some("5.10") => "solaris10",
            Some("5.11") => "solaris11",
            _ => "solaris",
        }
    };
    let os_version = solaris_version(signals);
    let package_manager = match distro_id {
        "solaris11" | "openindiana" | "omnios" | "smartos" | "illumos" => PackageManager::Ips,
        _ if tool_exists("pkgutil") => PackageManager::Pkgutil,
        _ => PackageManager::Pkgadd,
    };
    let variant = release
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string());
    PlatformProfile {
        os_family: OsFamily::Solaris,
        distro_id: distro_id.to_string(),
        os_version_major: major_of(&os_version),
        os_version,
        variant,
        package_manager,
    }
}

fn solaris_version(signals: &HostSignals) -> String {
    if let Some(release) = &signals.release_file {
        if let Some(first) = release.lines().find(|l| !l.trim().is_empty()) {
            let mut tokens = first.split_whitespace().peekable();
            while let Some(token) = tokens.next() {
                if token.eq_ignore_ascii_case("solaris") {
                    if let Some(next) = tokens.peek() {
                        if next.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                            return next.to_string();
                        }
                    }
                }
            }
        }
    }
    match signals.kernel_release.as_deref() {
        Some(r) => r.strip_prefix("5.").unwrap_or(r).to_string(),
        None => "unknown".to_string(),
    }
}

fn aix_profile(signals: &HostSignals, tool_exists: &dyn Fn(&str) -> bool) -> PlatformProfile {
    // oslevel is authoritative; uname major.minor is the coarse fallback
    // on hosts where the fileset database is damaged.
    let uname_version = match (&signals.kernel_version, &signals.kernel_release) {
        (Some(major), Some(minor)) => Some(format!("{major}.{minor}")),
        _ => None,
    };
    let os_version = signals
        .oslevel
        .clone()
        .or(uname_version)
        .unwrap_or_else(|| "unknown".to_string());
    let package_manager = if tool_exists("dnf") {
        PackageManager::Dnf
    } else if tool_exists("yum") {
        PackageManager::Yum
    } else {
        PackageManager::Installp
    };
    PlatformProfile {
        os_family: OsFamily::Aix,
        distro_id: "aix".to_string(),
        os_version_major: major_of(&os_version),
        os_version,
        variant: signals.oslevel_s.clone(),
        package_manager,
    }
}

fn hpux_profile(signals: &HostSignals, tool_exists: &dyn Fn(&str) -> bool) -> PlatformProfile {
    let os_version = signals
        .kernel_release
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let variant = match os_version.as_str() {
        "B.11.11" => Some("11i v1".to_string()),
        "B.11.23" => Some("11i v2".to_string()),
        "B.11.31" => Some("11i v3".to_string()),
        _ => None,
    };
    let package_manager = if tool_exists("swinstall") {
        PackageManager::Swinstall
    } else {
        PackageManager::Manual
    };
    PlatformProfile {
        os_family: OsFamily::HpUx,
        distro_id: "hpux".to_string(),
        os_version_major: major_of(&os_version),
        os_version,
        variant,
        package_manager,
    }
}

fn linux_profile(signals: &HostSignals, tool_exists: &dyn Fn(&str) -> bool) -> PlatformProfile {
    let content = signals.os_release_file.as_deref().unwrap_or("");
    let distro_id = parse_os_release_field(content, "ID").unwrap_or_else(|| "linux".to_string());
    let os_version =
        parse_os_release_field(content, "VERSION_ID").unwrap_or_else(|| "unknown".to_string());
    let variant = parse_os_release_field(content, "PRETTY_NAME");
    let package_manager = ["apt-get", "dnf", "yum", "zypper"]
        .iter()
        .find(|pm| tool_exists(pm))
        .map(|pm| match *pm {
            "apt-get" => PackageManager::AptGet,
            "dnf" => PackageManager::Dnf,
            "yum" => PackageManager::Yum,
            _ => PackageManager::Zypper,
        })
        .unwrap_or(PackageManager::Manual);
    PlatformProfile {
        os_family: OsFamily::Linux,
        distro_id,
        os_version_major: major_of(&os_version),
        os_version,
        variant,
        package_manager,
    }
}

fn parse_os_release_field(content: &str, field: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix('=')?;
        Some(rest.trim().trim_matches('"').to_string())
    })
}

/// First numeric component of a version string ("B.11.31" gives 11).
fn major_of(version: &str) -> u32 {
    version
        .split('.')
        .find_map(|part| part.parse().ok())
        .unwrap_or(0)
}

/// "uname -sr" for report headers; never fails, degrades to "unknown".
pub fn kernel_string() -> String {
    match (capture("uname", &["-s"]), capture("uname", &["-r"])) {
        (Ok(name), Ok(release)) => format!("{} {}", name.trim(), release.trim()),
        (Ok(name), Err(_)) => name.trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn capture(program: &str, args: &[&str]) -> Result<String, io::Error> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_TOOLS: &dyn Fn(&str) -> bool = &|_| false;

    fn probe(available: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |tool: &str| available.contains(&tool)
    }

    #[test]
    fn classifies_aix_from_uname_and_oslevel() {
        let signals = HostSignals {
            kernel_name: Some("AIX".into()),
            oslevel: Some("7.2.0.0".into()),
            oslevel_s: Some("7200-05-03-2148".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Aix);
        assert_eq!(p.distro_id, "aix");
        assert_eq!(p.os_version_major, 7);
        assert_eq!(p.variant.as_deref(), Some("7200-05-03-2148"));
        assert_eq!(p.package_manager, PackageManager::Installp);
        assert_eq!(p.pretty_name(), "AIX 7.2");
    }

    #[test]
    fn aix_prefers_dnf_when_toolbox_is_installed() {
        let signals = HostSignals {
            kernel_name: Some("AIX".into()),
            oslevel: Some("7.3.1.0".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, &probe(&["dnf", "yum"]));
        assert_eq!(p.package_manager, PackageManager::Dnf);
    }

    #[test]
    fn aix_without_oslevel_composes_uname_fields() {
        let signals = HostSignals {
            kernel_name: Some("AIX".into()),
            kernel_version: Some("7".into()),
            kernel_release: Some("2".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_version, "7.2");
        assert_eq!(p.os_version_major, 7);
        assert_eq!(p.pretty_name(), "AIX 7.2");
    }

    #[test]
    fn classifies_hpux_11iv3() {
        let signals = HostSignals {
            kernel_name: Some("HP-UX".into()),
            kernel_release: Some("B.11.31".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, &probe(&["swinstall"]));
        assert_eq!(p.os_family, OsFamily::HpUx);
        assert_eq!(p.os_version_major, 11);
        assert_eq!(p.variant.as_deref(), Some("11i v3"));
        assert_eq!(p.package_manager, PackageManager::Swinstall);
        assert_eq!(p.pretty_name(), "HP-UX 11i v3");
    }

    #[test]
    fn hpux_without_depot_tools_falls_back_to_manual() {
        let signals = HostSignals {
            kernel_name: Some("HP-UX".into()),
            kernel_release: Some("B.11.23".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.variant.as_deref(), Some("11i v2"));
        assert_eq!(p.package_manager, PackageManager::Manual);
    }

    #[test]
    fn hpux_variant_lookup_covers_11i_v1_and_unknown_releases() {
        let v1 = HostSignals {
            kernel_name: Some("HP-UX".into()),
            kernel_release: Some("B.11.11".into()),
            ..HostSignals::default()
        };
        assert_eq!(classify(&v1, NO_TOOLS).variant.as_deref(), Some("11i v1"));

        let odd = HostSignals {
            kernel_name: Some("HP-UX".into()),
            kernel_release: Some("B.10.20".into()),
            ..HostSignals::default()
        };
        let p = classify(&odd, NO_TOOLS);
        assert_eq!(p.variant, None);
        assert_eq!(p.pretty_name(), "HP-UX B.10.20");
    }

    #[test]
    fn classifies_oracle_solaris_11() {
        let signals = HostSignals {
            kernel_name: Some("SunOS".into()),
            kernel_release: Some("5.11".into()),
            release_file: Some("  Oracle Solaris 11.4 X86\n  Copyright (c) 1983, 2018\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Solaris);
        assert_eq!(p.distro_id, "solaris11");
        assert_eq!(p.os_version, "11.4");
        assert_eq!(p.os_version_major, 11);
        assert_eq!(p.package_manager, PackageManager::Ips);
        assert_eq!(p.pretty_name(), "Oracle Solaris 11.4 X86");
    }

    #[test]
    fn classifies_solaris_10_with_pkgutil() {
        let signals = HostSignals {
            kernel_name: Some("SunOS".into()),
            kernel_release: Some("5.10".into()),
            release_file: Some("  Oracle Solaris 10 9/10 s10x_u9wos_14a X86\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, &probe(&["pkgutil"]));
        assert_eq!(p.distro_id, "solaris10");
        assert_eq!(p.os_version, "10");
        assert_eq!(p.package_manager, PackageManager::Pkgutil);
    }

    #[test]
    fn solaris_10_without_opencsw_uses_pkgadd() {
        let signals = HostSignals {
            kernel_name: Some("SunOS".into()),
            kernel_release: Some("5.10".into()),
            release_file: Some("  Solaris 10 10/09 s10x_u8wos_08a X86\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.package_manager, PackageManager::Pkgadd);
    }

    #[test]
    fn openindiana_outranks_its_illumos_credit_line() {
        let signals = HostSignals {
            kernel_name: Some("SunOS".into()),
            kernel_release: Some("5.11".into()),
            release_file: Some(
                "             OpenIndiana Hipster 2021.04 (powered by illumos)\n".into(),
            ),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.distro_id, "openindiana");
        assert_eq!(p.package_manager, PackageManager::Ips);
    }

    #[test]
    fn classifies_omnios_and_smartos() {
        let omnios = HostSignals {
            kernel_name: Some("SunOS".into()),
            release_file: Some("  OmniOS v11 r151038\n".into()),
            ..HostSignals::default()
        };
        assert_eq!(classify(&omnios, NO_TOOLS).distro_id, "omnios");

        let smartos = HostSignals {
            kernel_name: Some("SunOS".into()),
            release_file: Some("  SmartOS 20230119T000000Z x86_64\n".into()),
            ..HostSignals::default()
        };
        assert_eq!(classify(&smartos, NO_TOOLS).distro_id, "smartos");
    }

    #[test]
    fn unbranded_illumos_release_gets_the_generic_id() {
        let signals = HostSignals {
            kernel_name: Some("SunOS".into()),
            kernel_release: Some("5.11".into()),
            release_file: Some("  illumos-gate nightly build\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.distro_id, "illumos");
        assert_eq!(p.package_manager, PackageManager::Ips);
    }

    #[test]
    fn release_marker_without_cpuinfo_wins_over_missing_uname() {
        let signals = HostSignals {
            release_file: Some("  Oracle Solaris 11.3 SPARC\n".into()),
            has_cpuinfo: false,
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Solaris);
        assert_eq!(p.distro_id, "solaris11");
    }

    #[test]
    fn linux_fallback_reads_os_release() {
        let signals = HostSignals {
            kernel_name: Some("Linux".into()),
            kernel_release: Some("5.15.0-76-generic".into()),
            has_cpuinfo: true,
            os_release_file: Some(
                "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nPRETTY_NAME=\"Ubuntu 22.04.2 LTS\"\n"
                    .into(),
            ),
            ..HostSignals::default()
        };
        let p = classify(&signals, &probe(&["apt-get", "dnf"]));
        assert_eq!(p.os_family, OsFamily::Linux);
        assert_eq!(p.distro_id, "ubuntu");
        assert_eq!(p.os_version, "22.04");
        assert_eq!(p.os_version_major, 22);
        assert_eq!(p.package_manager, PackageManager::AptGet);
        assert_eq!(p.pretty_name(), "Ubuntu 22.04.2 LTS");
    }

    #[test]
    fn linux_with_cpuinfo_and_stray_release_file_stays_linux() {
        let signals = HostSignals {
            kernel_name: Some("Linux".into()),
            has_cpuinfo: true,
            release_file: Some("something unrelated\n".into()),
            os_release_file: Some("ID=debian\nVERSION_ID=\"12\"\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Linux);
    }

    #[test]
    fn bare_host_classifies_as_unknown() {
        let signals = HostSignals {
            kernel_name: Some("Haiku".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Unknown);
        assert_eq!(p.package_manager, PackageManager::Manual);
        assert_eq!(p.pretty_name(), "Unknown Unix");
    }

    #[test]
    fn solaris_marker_rescues_otherwise_unknown_host() {
        // Foreign kernel name, cpuinfo present (so the early marker rule is
        // off), no os-release. The release file alone must still win.
        let signals = HostSignals {
            kernel_name: Some("CustomOS".into()),
            kernel_release: Some("5.11".into()),
            has_cpuinfo: true,
            release_file: Some("  Oracle Solaris 11.4 SPARC\n".into()),
            ..HostSignals::default()
        };
        let p = classify(&signals, NO_TOOLS);
        assert_eq!(p.os_family, OsFamily::Solaris);
        assert_eq!(p.distro_id, "solaris11");
    }

    #[test]
    fn major_version_parsing_handles_letter_prefixes() {
        assert_eq!(major_of("B.11.31"), 11);
        assert_eq!(major_of("7.2.0.0"), 7);
        assert_eq!(major_of("11.4"), 11);
        assert_eq!(major_of("unknown"), 0);
    }
}
