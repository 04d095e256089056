//! Ticket filing against the remote tracker. Everything here is best
//! effort from the scan's point of view: the caller logs the outcome and
//! keeps going, so an unreachable service can never fail a completed run.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use crate::config::TicketConfig;
use crate::domain::finding::{Finding, Severity};
use crate::domain::report::Report;

/// Instance metadata service. Answering hosts are cloud instances and the
/// instance id beats the hostname for fleet-side correlation.
const IMDS_INSTANCE_ID_URL: &str = "http://169.254.169.254/latest/meta-data/instance-id";

pub enum TicketOutcome {
    /// Ticket created; holds the tracker's id for the transcript.
    Filed(String),
    /// No endpoint configured.
    NoEndpoint,
    /// Findings exist but none at or above the requested severity.
    NothingEligible,
}

/// Findings at or above the severity floor, report order preserved.
fn eligible_findings(report: &Report, floor: Severity) -> Vec<&Finding> {
    report
        .findings
        .iter()
        .filter(|f| f.severity.rank() <= floor.rank())
        .collect()
}

pub fn open_ticket(
    config: Option<&TicketConfig>,
    report: &Report,
    floor: Severity,
    transcript_path: &Path,
) -> Result<TicketOutcome> {
    let Some(config) = config else {
        return Ok(TicketOutcome::NoEndpoint);
    };
    let eligible = eligible_findings(report, floor);
    let Some(worst) = eligible.iter().min_by_key(|f| f.severity.rank()) else {
        return Ok(TicketOutcome::NothingEligible);
    };
    let severity = worst.severity;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("building HTTP client")?;

    let ident = system_ident(&client);
    let mut description = format!(
        "Performance scan on {} ({} {}, kernel {}) found {} bottleneck(s):\n\n",
        ident,
        report.summary.os_name,
        report.summary.os_version,
        report.summary.kernel,
        eligible.len()
    );
    for finding in &eligible {
        description.push_str(&format!("{finding}\n"));
    }

    let transcript = std::fs::read(transcript_path)
        .with_context(|| format!("reading transcript {}", transcript_path.display()))?;
    let payload = json!({
        "title": format!("[{}] performance bottlenecks on {ident}", severity),
        "severity": severity.as_str().to_lowercase(),
        "system": {
            "identifier": ident,
            "hostname": report.summary.hostname,
            "os": report.summary.os_name,
            "kernel": report.summary.kernel,
            "scan_mode": report.summary.mode,
            "scanned_at": report.summary.started_at,
        },
        "description": description,
        "attachments": [{
            "filename": transcript_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "transcript.log".to_string()),
            "content_base64": STANDARD.encode(&transcript),
        }],
    });

    let mut request = client.post(&config.endpoint).json(&payload);
    if let Some(token) = &config.token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .with_context(|| format!("posting ticket to {}", config.endpoint))?;
    if !response.status().is_success() {
        bail!("ticket service answered {}", response.status());
    }
    let id = response
        .json::<serde_json::Value>()
        .ok()
        .and_then(|v| {
            v.get("id")
                .or_else(|| v.get("key"))
                .map(|id| match id.as_str() {
                    Some(s) => s.to_string(),
                    None => id.to_string(),
                })
        })
        .unwrap_or_else(|| "created".to_string());
    Ok(TicketOutcome::Filed(id))
}

/// Cloud instance id when the metadata service answers quickly, otherwise
/// the hostname.
fn system_ident(client: &reqwest::blocking::Client) -> String {
    let imds = client
        .get(IMDS_INSTANCE_ID_URL)
        .timeout(Duration::from_secs(1))
        .send();
    if let Ok(resp) = imds {
        if resp.status().is_success() {
            if let Ok(id) = resp.text() {
                let id = id.trim();
                if !id.is_empty() {
                    return id.to_string();
                }
            }
        }
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
