//! Disk domain: filesystem fill levels, device utilization and, in deep
//! mode, a crude sequential throughput benchmark plus a survey of the
//! biggest space consumers.
//!
//! df layouts differ per flavor only in where the percent column sits, so
//! one parser takes the column index and each platform supplies its own.

use std::fs::File;
use std::io::{Read, Write};
use std::time::Instant;

use rand::RngCore;

use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;

// df -k / bdf percent column, zero-based.
const AIX_DF_PCT_COLUMN: usize = 3;
const UNIX_DF_PCT_COLUMN: usize = 4;

const BENCH_PAYLOAD_MIB: usize = 64;

pub struct SolarisDisk;

impl Collector for SolarisDisk {
    fn domain(&self) -> Domain {
        Domain::Disk
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = fs_check(cx, "df", &["-k"], UNIX_DF_PCT_COLUMN) {
            cx.skip("filesystem usage check", &e);
        }
        if let Err(e) = self.busy_check(cx) {
            cx.skip("disk utilization sample", &e);
        }
        deep_checks(cx);
    }
}

impl SolarisDisk {
    fn busy_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("iostat")?;
        let out = run_tool(&cmd, &["-xn", "2", "3"])?;
        let rows = parse_iostat_xn(&out);
        if rows.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "extended device statistics",
            });
        }
        report_busy(cx, rows, &cmd);
        Ok(())
    }
}

pub struct AixDisk;

impl Collector for AixDisk {
    fn domain(&self) -> Domain {
        Domain::Disk
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = fs_check(cx, "df", &["-k"], AIX_DF_PCT_COLUMN) {
            cx.skip("filesystem usage check", &e);
        }
        if let Err(e) = self.busy_check(cx) {
            cx.skip("disk utilization sample", &e);
        }
        deep_checks(cx);
    }
}

impl AixDisk {
    fn busy_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("iostat")?;
        let out = run_tool(&cmd, &["-d", "2", "3"])?;
        let rows = parse_iostat_aix(&out);
        if rows.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "disk activity table",
            });
        }
        report_busy(cx, rows, &cmd);
        Ok(())
    }
}

pub struct HpuxDisk;

impl Collector for HpuxDisk {
    fn domain(&self) -> Domain {
        Domain::Disk
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = fs_check(cx, "bdf", &[], UNIX_DF_PCT_COLUMN) {
            cx.skip("filesystem usage check", &e);
        }
        if let Err(e) = self.busy_check(cx) {
            cx.skip("disk utilization sample", &e);
        }
        deep_checks(cx);
    }
}

impl HpuxDisk {
    fn busy_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("sar")?;
        let out = run_tool(&cmd, &["-d", "2", "3"])?;
        let rows = parse_sar_d(&out);
        if rows.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "device activity report",
            });
        }
        report_busy(cx, rows, &cmd);
        Ok(())
    }
}

pub struct LinuxDisk;

impl Collector for LinuxDisk {
    fn domain(&self) -> Domain {
        Domain::Disk
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = fs_check(cx, "df", &["-k"], UNIX_DF_PCT_COLUMN) {
            cx.skip("filesystem usage check", &e);
        }
        if let Err(e) = self.busy_check(cx) {
            cx.skip("disk utilization sample", &e);
        }
        deep_checks(cx);
    }
}

impl LinuxDisk {
    fn busy_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("iostat")?;
        let out = run_tool(&cmd, &["-dx", "2", "3"])?;
        let rows = parse_iostat_linux(&out);
        if rows.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "extended device statistics",
            });
        }
        report_busy(cx, rows, &cmd);
        Ok(())
    }
}

fn fs_check(
    cx: &mut ScanContext<'_>,
    tool: &str,
    args: &[&str],
    pct_column: usize,
) -> Result<(), CollectError> {
    let cmd = cx.tool(tool)?;
    let out = run_tool(&cmd, args)?;
    let rows = parse_df_usage(&out, pct_column);
    if rows.is_empty() {
        return Err(CollectError::ParseMiss {
            tool: cmd,
            what: "filesystem table",
        });
    }
    cx.transcript
        .info(format!("checked {} mounted filesystems", rows.len()));
    for (mount, pct) in rows {
        cx.record(
            Metric::new(Domain::Disk, "fs_used_pct", pct, "%", &cmd).subject(mount),
        );
    }
    Ok(())
}

fn report_busy(cx: &mut ScanContext<'_>, rows: Vec<(String, f64)>, cmd: &str) {
    for (device, busy) in rows {
        cx.transcript
            .info(format!("device {device}: {busy:.0}% busy"));
        cx.record(
            Metric::new(Domain::Disk, "disk_busy_pct", busy, "%", cmd).subject(device),
        );
    }
}

fn deep_checks(cx: &mut ScanContext<'_>) {
    if !cx.deep {
        return;
    }
    if let Err(e) = top_consumers(cx) {
        cx.skip("space consumer survey", &e);
    }
    if let Err(e) = throughput_benchmark(cx) {
        cx.skip("throughput benchmark", &e);
    }
}

/// Top-level directories by size, transcript only. Informational context
/// for whoever reads the ticket; never a finding on its own.
fn top_consumers(cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
    let sh = cx.tool("sh")?;
    let out = run_tool(&sh, &["-c", "du -sk /* 2>/dev/null"])?;
    let top = parse_du_top(&out, 10);
    if top.is_empty() {
        return Err(CollectError::ParseMiss {
            tool: "du".to_string(),
            what: "directory sizes",
        });
    }
    cx.transcript.info("largest top-level directories:");
    for (path, kb) in top {
        cx.transcript
            .info(format!("  {:>8.0} MiB  {path}", kb / 1024.0));
    }
    Ok(())
}

/// Write then re-read a random payload through the output directory and
/// time both passes. Durations, not rates: the thresholds compare with
/// "greater than" so slow storage is the breach.
fn throughput_benchmark(cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
    cx.transcript.info(format!(
        "benchmark: {BENCH_PAYLOAD_MIB} MiB sequential write/read in {}",
        cx.output_dir.display()
    ));
    let mut chunk = vec![0u8; 1024 * 1024];
    rand::rng().fill_bytes(&mut chunk);

    let mut scratch = tempfile::Builder::new()
        .prefix("sounder-bench.")
        .tempfile_in(cx.output_dir)
        .map_err(|e| CollectError::Io {
            what: "creating benchmark scratch file",
            source: e,
        })?;

    let started = Instant::now();
    for _ in 0..BENCH_PAYLOAD_MIB {
        scratch.write_all(&chunk).map_err(|e| CollectError::Io {
            what: "writing benchmark payload",
            source: e,
        })?;
    }
    scratch.as_file().sync_all().map_err(|e| CollectError::Io {
        what: "syncing benchmark payload",
        source: e,
    })?;
    let write_secs = started.elapsed().as_secs_f64();

    let mut reader = File::open(scratch.path()).map_err(|e| CollectError::Io {
        what: "reopening benchmark scratch file",
        source: e,
    })?;
    let started = Instant::now();
    loop {
        let n = reader.read(&mut chunk).map_err(|e| CollectError::Io {
            what: "reading benchmark payload",
            source: e,
        })?;
        if n == 0 {
            break;
        }
    }
    let read_secs = started.elapsed().as_secs_f64();

    cx.transcript.info(format!(
        "benchmark: write {write_secs:.2}s, read {read_secs:.2}s"
    ));
    cx.record(
        Metric::new(Domain::Disk, "bench_write_secs", write_secs, "s", "benchmark")
            .observed(format!("{write_secs:.1}s for {BENCH_PAYLOAD_MIB} MiB")),
    );
    cx.record(
        Metric::new(Domain::Disk, "bench_read_secs", read_secs, "s", "benchmark")
            .observed(format!("{read_secs:.1}s for {BENCH_PAYLOAD_MIB} MiB")),
    );
    Ok(())
}

/// Mounted filesystems with their used percentage. The percent column must
/// actually carry a percent sign, which conveniently rejects headers and
/// the continuation half of wrapped long-device rows.
fn parse_df_usage(output: &str, pct_column: usize) -> Vec<(String, f64)> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() <= pct_column + 1 {
            continue;
        }
        let Some(pct) = parts[pct_column]
            .strip_suffix('%')
            .and_then(|p| p.parse::<f64>().ok())
        else {
            continue;
        };
        let mount = parts[parts.len() - 1];
        if !mount.starts_with('/') {
            continue;
        }
        if is_pseudo_fs(parts[0], mount) {
            continue;
        }
        rows.push((mount.to_string(), pct));
    }
    rows
}

fn is_pseudo_fs(device: &str, mount: &str) -> bool {
    const PSEUDO_DEVICES: &[&str] = &[
        "proc", "procfs", "devfs", "dev", "fd", "mnttab", "sharetab", "objfs", "ctfs",
        "swap", "tmpfs", "devtmpfs", "udev", "none", "overlay", "shm", "sysfs",
    ];
    const PSEUDO_MOUNTS: &[&str] = &[
        "/proc", "/dev", "/devices", "/system", "/etc/mnttab", "/etc/svc", "/sys", "/run",
    ];
    PSEUDO_DEVICES.contains(&device)
        || PSEUDO_MOUNTS
            .iter()
            .any(|prefix| mount == *prefix || mount.starts_with(&format!("{prefix}/")))
}

/// Solaris `iostat -xn`: device name last, %b second to last. Repeated
/// sample blocks collapse to the final value per device.
fn parse_iostat_xn(output: &str) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = Vec::new();
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() < 11 || t[0].parse::<f64>().is_err() {
            continue;
        }
        let device = t[t.len() - 1];
        if device.parse::<f64>().is_ok() {
            continue;
        }
        if let Ok(busy) = t[t.len() - 2].parse::<f64>() {
            upsert(&mut rows, device, busy);
        }
    }
    rows
}

/// AIX `iostat -d`: device first, % tm_act second.
fn parse_iostat_aix(output: &str) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = Vec::new();
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() < 5 {
            continue;
        }
        let first_alpha = t[0]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());
        if !first_alpha || t[0].ends_with(':') || t[0] == "Disks:" || t[0] == "System" {
            continue;
        }
        if let Ok(busy) = t[1].parse::<f64>() {
            upsert(&mut rows, t[0], busy);
        }
    }
    rows
}

/// HP-UX `sar -d`: prefer Average rows, fall back to the last timestamped
/// sample per device.
fn parse_sar_d(output: &str) -> Vec<(String, f64)> {
    let mut averages: Vec<(String, f64)> = Vec::new();
    let mut samples: Vec<(String, f64)> = Vec::new();
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() < 3 {
            continue;
        }
        if t[0] == "Average" {
            if let Ok(busy) = t[2].parse::<f64>() {
                upsert(&mut averages, t[1], busy);
            }
        } else if t[0].contains(':') {
            if let Ok(busy) = t[2].parse::<f64>() {
                upsert(&mut samples, t[1], busy);
            }
        }
    }
    if averages.is_empty() {
        samples
    } else {
        averages
    }
}

/// Linux `iostat -dx`: device first, %util last.
fn parse_iostat_linux(output: &str) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = Vec::new();
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() < 4 || t[0] == "Device" || t[0] == "Linux" {
            continue;
        }
        let first_alpha = t[0]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());
        if !first_alpha {
            continue;
        }
        if let Ok(busy) = t[t.len() - 1].parse::<f64>() {
            upsert(&mut rows, t[0], busy);
        }
    }
    rows
}

fn parse_du_top(output: &str, limit: usize) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let Some(kb) = parts.next().and_then(|k| k.parse::<f64>().ok()) else {
            continue;
        };
        let path: Vec<&str> = parts.collect();
        if path.is_empty() {
            continue;
        }
        rows.push((path.join(" "), kb));
    }
    rows.sort_by(|a, b| b.1.total_cmp(&a.1));
    rows.truncate(limit);
    rows
}

fn upsert(rows: &mut Vec<(String, f64)>, device: &str, busy: f64) {
    match rows.iter_mut().find(|(d, _)| d == device) {
        Some(row) => row.1 = busy,
        None => rows.push((device.to_string(), busy)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn df_solaris_layout_with_pseudo_rows() {
        let out = "\
Filesystem            kbytes    used   avail capacity  Mounted on
rpool/ROOT/solaris   101234567 50123456 49123456    51%    /
proc                       0       0       0     0%    /proc
swap                 4829824     123 4829701     1%    /tmp
rpool/export         101234567 92123456  8123456    92%    /export
";
        let rows = parse_df_usage(out, UNIX_DF_PCT_COLUMN);
        assert_eq!(
            rows,
            vec![("/".to_string(), 51.0), ("/export".to_string(), 92.0)]
        );
    }

    #[test]
    fn df_aix_percent_sits_in_fourth_column() {
        let out = "\
Filesystem    1024-blocks      Free %Used    Iused %Iused Mounted on
/dev/hd4           262144     84540   68%    12034    38% /
/dev/hd2          4194304    123456   98%    98765    54% /usr
/proc                   -         -    -         -     -  /proc
";
        let rows = parse_df_usage(out, AIX_DF_PCT_COLUMN);
        assert_eq!(
            rows,
            vec![("/".to_string(), 68.0), ("/usr".to_string(), 98.0)]
        );
    }

    #[test]
    fn df_tolerates_wrapped_device_rows() {
        let out = "\
Filesystem            kbytes    used   avail capacity  Mounted on
/dev/dsk/c0t600A0B800026B4660000C0D0E0F01234d0s6
                     524288000 471859200 52428800    90%    /u01
/dev/dsk/c0t0d0s0    10485760 1048576  9437184    10%    /
";
        let rows = parse_df_usage(out, UNIX_DF_PCT_COLUMN);
        // The wrapped row's halves fail the shape check and drop out.
        assert_eq!(rows, vec![("/".to_string(), 10.0)]);
    }

    #[test]
    fn iostat_xn_takes_last_sample_per_device() {
        let out = "\
                    extended device statistics
    r/s    w/s   kr/s   kw/s wait actv wsvc_t asvc_t  %w  %b device
    0.5    2.3    5.1   18.2  0.0  0.0    0.1    2.9   0   1 c1t0d0
    0.0    0.0    0.0    0.0  0.0  0.0    0.0    0.0   0   0 c1t1d0
                    extended device statistics
    r/s    w/s   kr/s   kw/s wait actv wsvc_t asvc_t  %w  %b device
   10.5   92.3  105.1  818.2  0.0  0.9    0.1   12.9   5  85 c1t0d0
    0.0    0.0    0.0    0.0  0.0  0.0    0.0    0.0   0   0 c1t1d0
";
        let rows = parse_iostat_xn(out);
        assert_eq!(
            rows,
            vec![("c1t0d0".to_string(), 85.0), ("c1t1d0".to_string(), 0.0)]
        );
    }

    #[test]
    fn iostat_aix_reads_tm_act() {
        let out = "\
System configuration: lcpu=8 drives=2 paths=2 vdisks=0

tty:      tin         tout    avg-cpu: % user % sys % idle % iowait
          0.0         12.3               12.0   3.0   80.0      5.0

Disks:        % tm_act     Kbps      tps    Kb_read   Kb_wrtn
hdisk0           2.3      123.4     12.3     123456    234567
hdisk1          85.0     8123.4    812.3    9123456   1234567
";
        let rows = parse_iostat_aix(out);
        assert_eq!(
            rows,
            vec![("hdisk0".to_string(), 2.3), ("hdisk1".to_string(), 85.0)]
        );
    }

    #[test]
    fn sar_d_prefers_average_rows() {
        let out = "\
HP-UX gohan B.11.31 U ia64    08/22/26

14:40:01   device   %busy   avque   r+w/s  blks/s  avwait  avserv
14:40:03   c2t6d0    50.2     1.2      45     720     5.3    10.1
14:40:05   c2t6d0    48.0     1.1      44     700     5.2    10.0
Average    c2t6d0    49.1     1.1      44     710     5.2    10.0
Average    c3t1d0     9.5     0.4      11     170     2.0     4.9
";
        let rows = parse_sar_d(out);
        assert_eq!(
            rows,
            vec![("c2t6d0".to_string(), 49.1), ("c3t1d0".to_string(), 9.5)]
        );
    }

    #[test]
    fn sar_d_without_average_falls_back_to_samples() {
        let out = "\
14:40:01   device   %busy   avque   r+w/s  blks/s  avwait  avserv
14:40:03   c2t6d0    50.2     1.2      45     720     5.3    10.1
14:40:05   c2t6d0    48.0     1.1      44     700     5.2    10.0
";
        let rows = parse_sar_d(out);
        assert_eq!(rows, vec![("c2t6d0".to_string(), 48.0)]);
    }

    #[test]
    fn iostat_linux_reads_util_column() {
        let out = "\
Linux 5.15.0-76-generic (web01)  08/22/26  _x86_64_ (8 CPU)

Device            r/s     w/s     rkB/s     wkB/s   await  %util
sda              0.52    2.30     12.34     45.67    1.20   1.20
nvme0n1         10.20   85.30    512.34   4096.00    0.40  92.10
";
        let rows = parse_iostat_linux(out);
        assert_eq!(
            rows,
            vec![("sda".to_string(), 1.2), ("nvme0n1".to_string(), 92.1)]
        );
    }

    #[test]
    fn du_survey_sorts_and_truncates() {
        let out = "\
123456 /usr
4567 /etc
9876543 /opt
888 /lost found
";
        let rows = parse_du_top(out, 2);
        assert_eq!(rows[0], ("/opt".to_string(), 9876543.0));
        assert_eq!(rows[1], ("/usr".to_string(), 123456.0));
    }
}
