//! CPU pressure checks: sampled utilization, load averages normalized by
//! core count, and run queue depth.
//!
//! Utilization always comes from a short blocking sampling window (vmstat
//! or sar over a few seconds), never from a single instantaneous read.

use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;

// Classic AIX vmstat data row:
//   r b avm fre re pi po fr sr cy in sy cs us sy id wa [pc ec]
// The SPLPAR columns append after wa, so id stays put.
const AIX_IDLE_COLUMN: usize = 15;

// procps vmstat data row:
//   r b swpd free buff cache si so bi bo in cs us sy id wa st [gu]
const LINUX_IDLE_COLUMN: usize = 14;

pub struct SolarisCpu;

impl Collector for SolarisCpu {
    fn domain(&self) -> Domain {
        Domain::Cpu
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        let ncpu = cpu_count(cx, solaris_cpu_count);
        if let Err(e) = load_check(cx, ncpu) {
            cx.skip("load averages", &e);
        }
        if let Err(e) = vmstat_busy_check(cx, None, ncpu) {
            cx.skip("cpu utilization sample", &e);
        }
    }
}

pub struct AixCpu;

impl Collector for AixCpu {
    fn domain(&self) -> Domain {
        Domain::Cpu
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        let ncpu = cpu_count(cx, aix_cpu_count);
        if let Err(e) = load_check(cx, ncpu) {
            cx.skip("load averages", &e);
        }
        if let Err(e) = self.busy_check(cx, ncpu) {
            cx.skip("cpu utilization sample", &e);
        }
    }
}

impl AixCpu {
    /// Prefer sar; hosts without bos.acct fall through to vmstat.
    fn busy_check(&self, cx: &mut ScanContext<'_>, ncpu: u32) -> Result<(), CollectError> {
        let cmd = cx.tool("sar")?;
        if cmd == "sar" {
            let out = run_tool("sar", &["-u", "2", "3"])?;
            let idle = parse_sar_cpu(&out).ok_or(CollectError::ParseMiss {
                tool: cmd.clone(),
                what: "cpu utilization",
            })?;
            let busy = (100.0 - idle).clamp(0.0, 100.0);
            cx.transcript
                .info(format!("cpu busy {busy:.0}% (idle {idle:.0}%)"));
            cx.record(Metric::new(Domain::Cpu, "cpu_busy_pct", busy, "%", &cmd));
            Ok(())
        } else {
            vmstat_busy_check(cx, Some(AIX_IDLE_COLUMN), ncpu)
        }
    }
}

pub struct HpuxCpu;

impl Collector for HpuxCpu {
    fn domain(&self) -> Domain {
        Domain::Cpu
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        let ncpu = cpu_count(cx, hpux_cpu_count);
        if let Err(e) = load_check(cx, ncpu) {
            cx.skip("load averages", &e);
        }
        if let Err(e) = sar_busy_check(cx) {
            cx.skip("cpu utilization sample", &e);
        }
    }
}

pub struct LinuxCpu;

impl Collector for LinuxCpu {
    fn domain(&self) -> Domain {
        Domain::Cpu
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        let ncpu = cpu_count(cx, linux_cpu_count);
        if let Err(e) = load_check(cx, ncpu) {
            cx.skip("load averages", &e);
        }
        if let Err(e) = vmstat_busy_check(cx, Some(LINUX_IDLE_COLUMN), ncpu) {
            cx.skip("cpu utilization sample", &e);
        }
    }
}

/// Core count with the documented degradation: if it cannot be determined,
/// divide by 1 and say so.
fn cpu_count(
    cx: &mut ScanContext<'_>,
    counter: fn(&mut ScanContext<'_>) -> Result<u32, CollectError>,
) -> u32 {
    match counter(cx) {
        Ok(n) if n > 0 => {
            cx.transcript.info(format!("cpu count: {n}"));
            n
        }
        _ => {
            cx.transcript
                .warn("could not determine CPU count; normalizing by 1");
            1
        }
    }
}

fn solaris_cpu_count(cx: &mut ScanContext<'_>) -> Result<u32, CollectError> {
    let cmd = cx.tool("psrinfo")?;
    let out = run_tool(&cmd, &[])?;
    Ok(count_psrinfo(&out))
}

fn aix_cpu_count(cx: &mut ScanContext<'_>) -> Result<u32, CollectError> {
    let cmd = cx.tool("lsdev")?;
    let out = run_tool(&cmd, &["-Cc", "processor"])?;
    Ok(count_lsdev_processors(&out))
}

fn hpux_cpu_count(cx: &mut ScanContext<'_>) -> Result<u32, CollectError> {
    let cmd = cx.tool("ioscan")?;
    let out = run_tool(&cmd, &["-fkC", "processor"])?;
    Ok(count_ioscan_processors(&out))
}

fn linux_cpu_count(cx: &mut ScanContext<'_>) -> Result<u32, CollectError> {
    let cmd = cx.tool("nproc")?;
    let out = run_tool(&cmd, &[])?;
    out.trim().parse().map_err(|_| CollectError::ParseMiss {
        tool: cmd,
        what: "processor count",
    })
}

fn load_check(cx: &mut ScanContext<'_>, ncpu: u32) -> Result<(), CollectError> {
    let cmd = cx.tool("uptime")?;
    let out = run_tool(&cmd, &[])?;
    let line = out.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    let (one, five, fifteen) = parse_uptime_loads(line).ok_or(CollectError::ParseMiss {
        tool: cmd.clone(),
        what: "load averages",
    })?;
    cx.transcript
        .info(format!("load averages: {one:.2} {five:.2} {fifteen:.2}"));
    cx.record(
        Metric::new(Domain::Cpu, "load_avg_per_cpu", one / ncpu as f64, "", &cmd)
            .observed(format!("{one:.2} across {ncpu} CPUs")),
    );
    Ok(())
}

fn vmstat_busy_check(
    cx: &mut ScanContext<'_>,
    idle_column: Option<usize>,
    ncpu: u32,
) -> Result<(), CollectError> {
    let cmd = cx.tool("vmstat")?;
    let out = run_tool(&cmd, &["2", "3"])?;
    let (runq, idle) = parse_vmstat_tail(&out, idle_column).ok_or(CollectError::ParseMiss {
        tool: cmd.clone(),
        what: "cpu sample",
    })?;
    let busy = (100.0 - idle).clamp(0.0, 100.0);
    cx.transcript.info(format!(
        "cpu busy {busy:.0}% (idle {idle:.0}%), run queue {runq:.0}"
    ));
    cx.record(Metric::new(Domain::Cpu, "cpu_busy_pct", busy, "%", &cmd));
    cx.record(
        Metric::new(
            Domain::Cpu,
            "run_queue_per_cpu",
            runq / ncpu as f64,
            "",
            &cmd,
        )
        .observed(format!("{runq:.0} across {ncpu} CPUs")),
    );
    Ok(())
}

fn sar_busy_check(cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
    let cmd = cx.tool("sar")?;
    let out = run_tool(&cmd, &["-u", "2", "3"])?;
    let idle = parse_sar_cpu(&out).ok_or(CollectError::ParseMiss {
        tool: cmd.clone(),
        what: "cpu utilization",
    })?;
    let busy = (100.0 - idle).clamp(0.0, 100.0);
    cx.transcript
        .info(format!("cpu busy {busy:.0}% (idle {idle:.0}%)"));
    cx.record(Metric::new(Domain::Cpu, "cpu_busy_pct", busy, "%", &cmd));
    Ok(())
}

/// Pull the three load averages out of an uptime line. Handles both the
/// comma form ("load average: 0.12, 0.34, 0.56") and the space form some
/// systems print ("load averages: 0.12 0.34 0.56").
fn parse_uptime_loads(line: &str) -> Option<(f64, f64, f64)> {
    let idx = line.find("load average")?;
    let tail = line[idx..].split(':').nth(1)?;
    let nums: Vec<f64> = tail
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse().ok())
        .take(3)
        .collect();
    if nums.len() == 3 {
        Some((nums[0], nums[1], nums[2]))
    } else {
        None
    }
}

/// Last data row of a vmstat run: (run queue, idle %). The idle column is
/// positional and differs per flavor; `None` means rightmost, which holds
/// on Solaris where the cpu group ends the row.
fn parse_vmstat_tail(output: &str, idle_column: Option<usize>) -> Option<(f64, f64)> {
    let line = output.lines().rev().find(|l| {
        let t: Vec<&str> = l.split_whitespace().collect();
        t.len() >= 5
            && t[0].parse::<f64>().is_ok()
            && t[t.len() - 1].parse::<f64>().is_ok()
    })?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let runq: f64 = tokens[0].parse().ok()?;
    let idle: f64 = match idle_column {
        Some(i) => tokens.get(i)?.parse().ok()?,
        None => tokens.last()?.parse().ok()?,
    };
    Some((runq, idle))
}

/// %idle from `sar -u`, preferring the Average row. Both the AIX and HP-UX
/// layouts put %idle in the fifth column, with AIX sometimes appending
/// physc after it.
fn parse_sar_cpu(output: &str) -> Option<f64> {
    let row = output
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with("Average"))
        .or_else(|| {
            output.lines().rev().find(|l| {
                let t: Vec<&str> = l.split_whitespace().collect();
                t.len() >= 5 && t[0].contains(':') && t[4].parse::<f64>().is_ok()
            })
        })?;
    let tokens: Vec<&str> = row.split_whitespace().collect();
    tokens.get(4)?.parse().ok()
}

fn count_psrinfo(output: &str) -> u32 {
    output.lines().filter(|l| !l.trim().is_empty()).count() as u32
}

fn count_lsdev_processors(output: &str) -> u32 {
    output
        .lines()
        .filter(|l| l.trim_start().starts_with("proc"))
        .count() as u32
}

fn count_ioscan_processors(output: &str) -> u32 {
    output
        .lines()
        .filter(|l| l.split_whitespace().next() == Some("processor"))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_loads_with_commas() {
        let line = " 14:10:03 up 245 days,  3:12,  2 users,  load average: 0.52, 0.58, 0.59";
        assert_eq!(parse_uptime_loads(line), Some((0.52, 0.58, 0.59)));
    }

    #[test]
    fn uptime_loads_space_separated() {
        let line = "  2:14pm  up 112 days, 4 users,  load averages: 1.05 1.10 1.08";
        assert_eq!(parse_uptime_loads(line), Some((1.05, 1.10, 1.08)));
    }

    #[test]
    fn uptime_without_loads_is_a_miss() {
        assert_eq!(parse_uptime_loads("garbage output"), None);
    }

    #[test]
    fn vmstat_tail_solaris_idle_is_last() {
        let out = "\
 kthr      memory            page            disk          faults      cpu
 r b w   swap  free  re  mf pi po fr de sr cd cd s0 s2   in   sy   cs us sy id
 1 0 0 4829824 984512 12  45  0  0  0  0  0  0  0  0  0  312  514  278  2  1 97
 2 0 0 4828800 982100  1   2  0  0  0  0  0  0  0  0  0  310  450  260 45 10 45
";
        assert_eq!(parse_vmstat_tail(out, None), Some((2.0, 45.0)));
    }

    #[test]
    fn vmstat_tail_aix_fixed_column() {
        let out = "\
System configuration: lcpu=8 mem=16384MB ent=1.00

kthr    memory              page              faults              cpu
----- ----------- ------------------------ ------------ -----------------------
 r  b   avm   fre  re  pi  po  fr   sr  cy  in   sy  cs us sy id wa   pc   ec
 3  0 864123 12345   0   0   0   0    0   0 150 2200 300 35 10 50  5 0.45 45.0
";
        assert_eq!(parse_vmstat_tail(out, Some(AIX_IDLE_COLUMN)), Some((3.0, 50.0)));
    }

    #[test]
    fn vmstat_tail_linux_fixed_column() {
        let out = "\
procs -----------memory---------- ---swap-- -----io---- -system-- ------cpu-----
 r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st
 5  0  85120 1203456 234567 5678901    0    0    12    34  310  520 72  8 15  5  0
";
        assert_eq!(parse_vmstat_tail(out, Some(LINUX_IDLE_COLUMN)), Some((5.0, 15.0)));
    }

    #[test]
    fn sar_prefers_average_row() {
        let out = "\

HP-UX gohan B.11.31 U ia64    08/22/26

14:32:10    %usr    %sys    %wio   %idle
14:32:12      40      12       3      45
14:32:16      44      13       3      40
Average       42      12       3      43
";
        assert_eq!(parse_sar_cpu(out), Some(43.0));
    }

    #[test]
    fn sar_average_with_trailing_physc() {
        let out = "\
17:41:42    %usr    %sys    %wio   %idle   physc
17:41:44       2       1       0      97    0.00
Average        2       1       0      96    0.00
";
        assert_eq!(parse_sar_cpu(out), Some(96.0));
    }

    #[test]
    fn sar_without_average_uses_last_sample() {
        let out = "\
14:32:10    %usr    %sys    %wio   %idle
14:32:12      40      12       3      45
14:32:16      44      13       3      40
";
        assert_eq!(parse_sar_cpu(out), Some(40.0));
    }

    #[test]
    fn processor_counting() {
        let psrinfo = "0\ton-line   since 07/10/2026 11:12:13\n1\ton-line   since 07/10/2026 11:12:15\n";
        assert_eq!(count_psrinfo(psrinfo), 2);

        let lsdev = "proc0 Available 00-00 Processor\nproc8 Available 00-08 Processor\n";
        assert_eq!(count_lsdev_processors(lsdev), 2);

        let ioscan = "\
Class       I  H/W Path  Driver    S/W State   H/W Type     Description
========================================================================
processor   0  120       processor   CLAIMED     PROCESSOR    Processor
processor   1  121       processor   CLAIMED     PROCESSOR    Processor
";
        assert_eq!(count_ioscan_processors(ioscan), 2);
    }
}
