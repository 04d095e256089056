//! Static threshold table and the evaluator that turns metrics into findings.
//!
//! Every rule is a plain tuple of domain, metric name, comparator, limit and
//! severity. Strictness lives in the comparator: `cpu_busy_pct` fires at
//! exactly 90 while `fs_used_pct` needs 91, and the flag-style storage rules
//! use equality against 1 or 0.

use serde::{Deserialize, Serialize};

use crate::domain::finding::{Domain, Finding, Metric, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }

    fn matches(&self, value: f64, limit: f64) -> bool {
        let equal = (value - limit).abs() < 1e-9;
        match self {
            Comparator::Gt => value > limit && !equal,
            Comparator::Ge => value > limit || equal,
            Comparator::Eq => equal,
            Comparator::Ne => !equal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub domain: Domain,
    pub metric: &'static str,
    pub op: Comparator,
    pub limit: f64,
    pub severity: Severity,
    pub issue: &'static str,
    /// Display override for the threshold side, for rules where the raw
    /// limit number would be meaningless ("ONLINE" rather than "1").
    pub threshold_label: Option<&'static str>,
}

const RULES: &[Threshold] = &[
    // CPU
    Threshold {
        domain: Domain::Cpu,
        metric: "cpu_busy_pct",
        op: Comparator::Ge,
        limit: 90.0,
        severity: Severity::High,
        issue: "CPU utilization saturated",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Cpu,
        metric: "load_avg_per_cpu",
        op: Comparator::Gt,
        limit: 2.0,
        severity: Severity::Medium,
        issue: "Load average far above core count",
        threshold_label: Some("2.0 per CPU"),
    },
    Threshold {
        domain: Domain::Cpu,
        metric: "run_queue_per_cpu",
        op: Comparator::Gt,
        limit: 1.0,
        severity: Severity::Low,
        issue: "Kernel run queue backing up",
        threshold_label: Some("1 per CPU"),
    },
    // Memory
    Threshold {
        domain: Domain::Memory,
        metric: "memory_used_pct",
        op: Comparator::Gt,
        limit: 90.0,
        severity: Severity::High,
        issue: "Physical memory nearly exhausted",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Memory,
        metric: "swap_used_pct",
        op: Comparator::Ge,
        limit: 50.0,
        severity: Severity::Medium,
        issue: "Heavy swap consumption",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Memory,
        metric: "paging_space_used_pct",
        op: Comparator::Gt,
        limit: 70.0,
        severity: Severity::Medium,
        issue: "Paging space pressure",
        threshold_label: None,
    },
    // Disk
    Threshold {
        domain: Domain::Disk,
        metric: "fs_used_pct",
        op: Comparator::Gt,
        limit: 90.0,
        severity: Severity::High,
        issue: "Filesystem nearly full",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Disk,
        metric: "disk_busy_pct",
        op: Comparator::Gt,
        limit: 80.0,
        severity: Severity::Medium,
        issue: "Disk persistently busy",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Disk,
        metric: "bench_write_secs",
        op: Comparator::Gt,
        limit: 10.0,
        severity: Severity::Medium,
        issue: "Slow sequential write throughput",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Disk,
        metric: "bench_read_secs",
        op: Comparator::Gt,
        limit: 5.0,
        severity: Severity::Medium,
        issue: "Slow sequential read throughput",
        threshold_label: None,
    },
    // Storage
    Threshold {
        domain: Domain::Storage,
        metric: "pool_capacity_pct",
        op: Comparator::Gt,
        limit: 80.0,
        severity: Severity::High,
        issue: "ZFS pool above its performance ceiling",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Storage,
        metric: "pool_health_degraded",
        op: Comparator::Eq,
        limit: 1.0,
        severity: Severity::Critical,
        issue: "Storage pool not healthy",
        threshold_label: Some("ONLINE"),
    },
    Threshold {
        domain: Domain::Storage,
        metric: "pool_ashift_small_ssd",
        op: Comparator::Eq,
        limit: 1.0,
        severity: Severity::Medium,
        issue: "Pool sector shift below 4K on solid-state members",
        threshold_label: Some("ashift >= 12"),
    },
    Threshold {
        domain: Domain::Storage,
        metric: "vtoc_label_large_disk",
        op: Comparator::Eq,
        limit: 1.0,
        severity: Severity::High,
        issue: "SMI/VTOC label on a disk beyond its 2 TiB limit",
        threshold_label: Some("EFI/GPT label"),
    },
    Threshold {
        domain: Domain::Storage,
        metric: "part_misaligned",
        op: Comparator::Eq,
        limit: 1.0,
        severity: Severity::Medium,
        issue: "Partition start not 4 KiB aligned",
        threshold_label: Some("8-sector boundary"),
    },
    Threshold {
        domain: Domain::Storage,
        metric: "vg_free_extents",
        op: Comparator::Eq,
        limit: 0.0,
        severity: Severity::High,
        issue: "Volume group has no free extents",
        threshold_label: Some("> 0 free"),
    },
    Threshold {
        domain: Domain::Storage,
        metric: "vg_stale_extents",
        op: Comparator::Ne,
        limit: 0.0,
        severity: Severity::Critical,
        issue: "Stale mirror copies in volume group",
        threshold_label: Some("0 stale"),
    },
    // Network
    Threshold {
        domain: Domain::Network,
        metric: "time_wait_count",
        op: Comparator::Gt,
        limit: 1000.0,
        severity: Severity::Medium,
        issue: "Excessive TIME_WAIT connections",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Network,
        metric: "close_wait_count",
        op: Comparator::Gt,
        limit: 500.0,
        severity: Severity::Medium,
        issue: "Connections stuck in CLOSE_WAIT",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Network,
        metric: "tcp_retrans_segs",
        op: Comparator::Gt,
        limit: 10000.0,
        severity: Severity::Low,
        issue: "High TCP retransmission count",
        threshold_label: None,
    },
    Threshold {
        domain: Domain::Network,
        metric: "if_error_count",
        op: Comparator::Gt,
        limit: 100.0,
        severity: Severity::Low,
        issue: "Interface error counters climbing",
        threshold_label: None,
    },
    // Database
    Threshold {
        domain: Domain::Database,
        metric: "db_active_connections",
        op: Comparator::Gt,
        limit: 500.0,
        severity: Severity::Medium,
        issue: "Database connection count high",
        threshold_label: None,
    },
];

/// The builtin rule set. One rule per (domain, metric name); first match wins.
pub struct ThresholdTable {
    rules: &'static [Threshold],
}

impl ThresholdTable {
    pub fn builtin() -> Self {
        ThresholdTable { rules: RULES }
    }

    pub fn rules(&self) -> &[Threshold] {
        self.rules
    }

    /// Evaluate one metric against the table. Returns at most one finding.
    pub fn evaluate(&self, metric: &Metric) -> Option<Finding> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.domain == metric.domain && r.metric == metric.name)?;
        if !rule.op.matches(metric.value, rule.limit) {
            return None;
        }
        let description = match &metric.subject {
            Some(subject) => format!("{} ({})", rule.issue, subject),
            None => rule.issue.to_string(),
        };
        let current = metric
            .observed
            .clone()
            .unwrap_or_else(|| format_value(metric.value, metric.unit));
        let threshold = match rule.threshold_label {
            Some(label) => label.to_string(),
            None => format_value(rule.limit, metric.unit),
        };
        Some(Finding {
            severity: rule.severity,
            category: metric.domain,
            description,
            current,
            threshold,
        })
    }
}

fn format_value(value: f64, unit: &str) -> String {
    let number = if value.fract().abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    };
    match unit {
        "" => number,
        "%" | "s" => format!("{number}{unit}"),
        other => format!("{number} {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ThresholdTable {
        ThresholdTable::builtin()
    }

    #[test]
    fn fs_usage_at_ninety_does_not_fire() {
        let m = Metric::new(Domain::Disk, "fs_used_pct", 90.0, "%", "df").subject("/var");
        assert!(table().evaluate(&m).is_none());
    }

    #[test]
    fn fs_usage_at_ninety_one_fires_high() {
        let m = Metric::new(Domain::Disk, "fs_used_pct", 91.0, "%", "df").subject("/var");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.category, Domain::Disk);
        assert_eq!(f.current, "91%");
        assert_eq!(f.threshold, "90%");
        assert!(f.description.contains("/var"));
    }

    #[test]
    fn cpu_busy_fires_at_exactly_ninety() {
        let m = Metric::new(Domain::Cpu, "cpu_busy_pct", 90.0, "%", "vmstat");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.severity, Severity::High);
    }

    #[test]
    fn time_wait_boundary() {
        let at = Metric::new(Domain::Network, "time_wait_count", 1000.0, "", "netstat");
        assert!(table().evaluate(&at).is_none());
        let over = Metric::new(Domain::Network, "time_wait_count", 1001.0, "", "netstat");
        let f = table().evaluate(&over).unwrap();
        assert_eq!(f.severity, Severity::Medium);
        assert_eq!(f.current, "1001");
        assert_eq!(f.threshold, "1000");
    }

    #[test]
    fn swap_fires_at_exactly_fifty() {
        let m = Metric::new(Domain::Memory, "swap_used_pct", 50.0, "%", "swap");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.severity, Severity::Medium);
    }

    #[test]
    fn degraded_pool_is_critical_with_health_text() {
        let m = Metric::new(Domain::Storage, "pool_health_degraded", 1.0, "", "zpool")
            .subject("tank")
            .observed("DEGRADED");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.current, "DEGRADED");
        assert_eq!(f.threshold, "ONLINE");
    }

    #[test]
    fn healthy_pool_flag_zero_is_silent() {
        let m = Metric::new(Domain::Storage, "pool_health_degraded", 0.0, "", "zpool")
            .subject("rpool")
            .observed("ONLINE");
        assert!(table().evaluate(&m).is_none());
    }

    #[test]
    fn exhausted_volume_group_fires_on_zero() {
        let m = Metric::new(Domain::Storage, "vg_free_extents", 0.0, "", "lsvg").subject("rootvg");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.severity, Severity::High);
    }

    #[test]
    fn stale_extents_fire_on_any_nonzero() {
        let clean = Metric::new(Domain::Storage, "vg_stale_extents", 0.0, "", "lsvg");
        assert!(table().evaluate(&clean).is_none());
        let stale =
            Metric::new(Domain::Storage, "vg_stale_extents", 3.0, "", "lsvg").subject("datavg");
        let f = table().evaluate(&stale).unwrap();
        assert_eq!(f.severity, Severity::Critical);
    }

    #[test]
    fn unknown_metric_name_yields_nothing() {
        let m = Metric::new(Domain::Cpu, "context_switches", 99999.0, "", "vmstat");
        assert!(table().evaluate(&m).is_none());
    }

    #[test]
    fn bench_durations_use_seconds_display() {
        let m = Metric::new(Domain::Disk, "bench_write_secs", 12.3, "s", "benchmark");
        let f = table().evaluate(&m).unwrap();
        assert_eq!(f.current, "12.3s");
        assert_eq!(f.threshold, "10s");
    }
}
