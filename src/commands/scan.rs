//! `sounder scan`: run the collectors for the selected mode, classify the
//! samples and write the transcript and report artifacts.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};

use crate::collectors::{self, ScanContext, ScanMode};
use crate::config;
use crate::domain::finding::Severity;
use crate::domain::report::{summarize, Report, StoredReport, SystemSummary};
use crate::domain::thresholds::ThresholdTable;
use crate::platform;
use crate::ticket::{self, TicketOutcome};
use crate::tools::ToolResolver;
use crate::transcript::Transcript;

pub fn run(
    mode: ScanMode,
    output_dir: Option<PathBuf>,
    ticket: bool,
    ticket_severity: Severity,
) -> Result<()> {
    ensure_root()?;
    let cfg = config::load()?;
    let output_dir = output_dir
        .or_else(|| cfg.output_dir.clone())
        .unwrap_or_else(env::temp_dir);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let log_path = output_dir.join(format!("sounder-{host}-{stamp}.log"));
    let report_path = output_dir.join(format!("sounder-{host}-{stamp}.json"));

    let mut transcript = Transcript::to_file(&log_path)
        .with_context(|| format!("creating transcript {}", log_path.display()))?;
    transcript.info(format!(
        "sounder {} starting, mode {mode}",
        env!("CARGO_PKG_VERSION")
    ));

    transcript.section("PLATFORM");
    let profile = platform::detect(&mut transcript).context("platform detection failed")?;

    let resolver = ToolResolver::new(profile.os_family);
    let thresholds = ThresholdTable::builtin();
    let started_at = Utc::now();
    let begun = Instant::now();

    // The context borrows the transcript for the collector loop; findings
    // move out so the summary can render afterwards.
    let findings = {
        let mut cx = ScanContext {
            profile: &profile,
            tools: &resolver,
            thresholds: &thresholds,
            transcript: &mut transcript,
            deep: mode.is_deep(),
            output_dir: &output_dir,
            findings: Vec::new(),
        };
        for domain in mode.domains() {
            cx.transcript
                .section(&format!("{} CHECKS", domain.as_str().to_uppercase()));
            match collectors::build(cx.family(), *domain) {
                Some(collector) => collector.collect(&mut cx),
                None => {
                    let family = cx.family();
                    cx.transcript
                        .info(format!("no {domain} checks on {family}"));
                }
            }
        }
        cx.findings
    };

    let summary = SystemSummary {
        hostname: host,
        os_name: profile.pretty_name(),
        os_version: profile.os_version.clone(),
        kernel: platform::kernel_string(),
        mode: mode.to_string(),
        started_at,
    };
    let report = summarize(findings, summary, begun.elapsed());
    render_summary(&mut transcript, &report);

    let stored = StoredReport::new(report);
    stored.write(&report_path)?;
    transcript.info(format!("report written to {}", report_path.display()));
    transcript.info(format!("transcript at {}", log_path.display()));
    transcript.flush();

    if ticket {
        file_ticket(&mut transcript, &cfg, &stored, ticket_severity, &log_path);
        transcript.flush();
    }
    Ok(())
}

/// Most of the native tools hide or zero their interesting counters for
/// ordinary users, so refuse early rather than produce a half-blind scan.
fn ensure_root() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("sounder samples privileged kernel counters; run it as root");
    }
    Ok(())
}

fn render_summary(transcript: &mut Transcript, report: &Report) {
    transcript.section("BOTTLENECK SUMMARY");
    if report.is_healthy() {
        transcript.ok(format!(
            "no bottlenecks detected ({:.1}s scan)",
            report.elapsed_secs
        ));
        return;
    }
    transcript.info(format!(
        "{} critical, {} high, {} medium, {} low ({:.1}s scan)",
        report.count(Severity::Critical),
        report.count(Severity::High),
        report.count(Severity::Medium),
        report.count(Severity::Low),
        report.elapsed_secs
    ));
    for severity in Severity::ALL {
        for finding in report.bucket(severity) {
            transcript.finding(finding);
        }
    }
}

/// Ticket failures never fail the scan; the artifacts on disk are the
/// primary deliverable and they are already written by this point.
fn file_ticket(
    transcript: &mut Transcript,
    cfg: &config::Config,
    stored: &StoredReport,
    floor: Severity,
    log_path: &Path,
) {
    if stored.report.is_healthy() {
        transcript.info("no findings, nothing to ticket");
        return;
    }
    match ticket::open_ticket(cfg.ticket.as_ref(), &stored.report, floor, log_path) {
        Ok(TicketOutcome::Filed(id)) => transcript.ok(format!("ticket {id} filed")),
        Ok(TicketOutcome::NoEndpoint) => {
            transcript.warn("no ticket endpoint configured, skipping ticket");
        }
        Ok(TicketOutcome::NothingEligible) => {
            transcript.info(format!(
                "no findings at or above {floor}, skipping ticket"
            ));
        }
        Err(err) => transcript.warn(format!("ticket filing failed: {err:#}")),
    }
}
