//! Memory pressure checks: physical usage, swap consumption and, on AIX,
//! paging space. Each flavor reports through its native tool; percentages
//! are computed here so thresholds stay unit-free.

use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;

pub struct SolarisMemory;

impl Collector for SolarisMemory {
    fn domain(&self) -> Domain {
        Domain::Memory
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.physical_check(cx) {
            cx.skip("physical memory check", &e);
        }
        if let Err(e) = self.swap_check(cx) {
            cx.skip("swap usage check", &e);
        }
    }
}

impl SolarisMemory {
    fn physical_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let prtconf = cx.tool("prtconf")?;
        let out = run_tool(&prtconf, &[])?;
        let total_mb = parse_prtconf_memory_mb(&out).ok_or(CollectError::ParseMiss {
            tool: prtconf.clone(),
            what: "memory size",
        })?;

        let kstat = cx.tool("kstat")?;
        let pages_out = run_tool(&kstat, &["-p", "unix:0:system_pages:freemem"])?;
        let free_pages = parse_kstat_value(&pages_out).ok_or(CollectError::ParseMiss {
            tool: kstat.clone(),
            what: "free page count",
        })?;

        let pagesize = cx.tool("pagesize")?;
        let ps_out = run_tool(&pagesize, &[])?;
        let page_bytes: f64 = ps_out.trim().parse().map_err(|_| CollectError::ParseMiss {
            tool: pagesize.clone(),
            what: "page size",
        })?;

        let free_mb = free_pages * page_bytes / (1024.0 * 1024.0);
        let used_pct = ((total_mb - free_mb) / total_mb * 100.0).clamp(0.0, 100.0);
        cx.transcript.info(format!(
            "memory: {used_pct:.0}% used ({free_mb:.0} MiB free of {total_mb:.0} MiB)"
        ));
        cx.record(Metric::new(
            Domain::Memory,
            "memory_used_pct",
            used_pct,
            "%",
            &kstat,
        ));
        Ok(())
    }

    fn swap_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let swap = cx.tool("swap")?;
        let out = run_tool(&swap, &["-s"])?;
        let (used_k, avail_k) = parse_swap_s(&out).ok_or(CollectError::ParseMiss {
            tool: swap.clone(),
            what: "swap summary",
        })?;
        let total_k = used_k + avail_k;
        if total_k <= 0.0 {
            return Err(CollectError::ParseMiss {
                tool: swap,
                what: "swap summary",
            });
        }
        let used_pct = used_k / total_k * 100.0;
        cx.transcript.info(format!(
            "swap: {used_pct:.0}% used ({:.0} MiB of {:.0} MiB)",
            used_k / 1024.0,
            total_k / 1024.0
        ));
        cx.record(Metric::new(
            Domain::Memory,
            "swap_used_pct",
            used_pct,
            "%",
            &swap,
        ));
        Ok(())
    }
}

pub struct AixMemory;

impl Collector for AixMemory {
    fn domain(&self) -> Domain {
        Domain::Memory
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.physical_check(cx) {
            cx.skip("physical memory check", &e);
        }
        if let Err(e) = self.paging_check(cx) {
            cx.skip("paging space check", &e);
        }
    }
}

impl AixMemory {
    fn physical_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let svmon = cx.tool("svmon")?;
        let out = run_tool(&svmon, &["-G"])?;
        let sample = parse_svmon(&out).ok_or(CollectError::ParseMiss {
            tool: svmon.clone(),
            what: "global memory snapshot",
        })?;
        // Computational pages are the honest signal; inuse counts file
        // cache and sits near 100% on any warm AIX box.
        let used_pct = (sample.virtual_pages / sample.size_pages * 100.0).clamp(0.0, 100.0);
        cx.transcript.info(format!(
            "memory: {used_pct:.0}% computational ({:.0}% incl. file cache)",
            (sample.inuse_pages / sample.size_pages * 100.0).clamp(0.0, 100.0)
        ));
        cx.record(Metric::new(
            Domain::Memory,
            "memory_used_pct",
            used_pct,
            "%",
            &svmon,
        ));
        Ok(())
    }

    fn paging_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let lsps = cx.tool("lsps")?;
        let out = run_tool(&lsps, &["-s"])?;
        let used_pct = parse_lsps_pct(&out).ok_or(CollectError::ParseMiss {
            tool: lsps.clone(),
            what: "paging space summary",
        })?;
        cx.transcript
            .info(format!("paging space: {used_pct:.0}% used"));
        cx.record(Metric::new(
            Domain::Memory,
            "paging_space_used_pct",
            used_pct,
            "%",
            &lsps,
        ));
        Ok(())
    }
}

pub struct HpuxMemory;

impl Collector for HpuxMemory {
    fn domain(&self) -> Domain {
        Domain::Memory
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.swapinfo_check(cx) {
            cx.skip("memory and swap check", &e);
        }
    }
}

impl HpuxMemory {
    /// One swapinfo call answers both questions: the pseudo-swap "memory"
    /// row tracks physical usage, the "total" row tracks paging pressure.
    fn swapinfo_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let swapinfo = cx.tool("swapinfo")?;
        let out = run_tool(&swapinfo, &["-tam"])?;
        let sample = parse_swapinfo(&out).ok_or(CollectError::ParseMiss {
            tool: swapinfo.clone(),
            what: "swapinfo table",
        })?;
        if let Some(mem_pct) = sample.memory_pct {
            cx.transcript
                .info(format!("memory: {mem_pct:.0}% used (pseudo-swap row)"));
            cx.record(Metric::new(
                Domain::Memory,
                "memory_used_pct",
                mem_pct,
                "%",
                &swapinfo,
            ));
        }
        if let Some(total_pct) = sample.total_pct {
            cx.transcript
                .info(format!("swap: {total_pct:.0}% of total reserved"));
            cx.record(Metric::new(
                Domain::Memory,
                "swap_used_pct",
                total_pct,
                "%",
                &swapinfo,
            ));
        }
        Ok(())
    }
}

pub struct LinuxMemory;

impl Collector for LinuxMemory {
    fn domain(&self) -> Domain {
        Domain::Memory
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.free_check(cx) {
            cx.skip("memory and swap check", &e);
        }
    }
}

impl LinuxMemory {
    fn free_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let free = cx.tool("free")?;
        let out = run_tool(&free, &["-k"])?;
        let sample = parse_free(&out).ok_or(CollectError::ParseMiss {
            tool: free.clone(),
            what: "free table",
        })?;
        cx.transcript
            .info(format!("memory: {:.0}% used", sample.mem_used_pct));
        cx.record(Metric::new(
            Domain::Memory,
            "memory_used_pct",
            sample.mem_used_pct,
            "%",
            &free,
        ));
        match sample.swap_used_pct {
            Some(swap_pct) => {
                cx.transcript.info(format!("swap: {swap_pct:.0}% used"));
                cx.record(Metric::new(
                    Domain::Memory,
                    "swap_used_pct",
                    swap_pct,
                    "%",
                    &free,
                ));
            }
            None => cx.transcript.info("swap: none configured"),
        }
        Ok(())
    }
}

fn parse_prtconf_memory_mb(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Memory size:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Value of a single `kstat -p` statistic line (name, tab, value).
fn parse_kstat_value(output: &str) -> Option<f64> {
    output
        .lines()
        .find(|l| !l.trim().is_empty())?
        .split_whitespace()
        .last()?
        .parse()
        .ok()
}

/// `swap -s` summary: (used KiB, available KiB).
fn parse_swap_s(output: &str) -> Option<(f64, f64)> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    let mut used = None;
    let mut avail = None;
    for pair in tokens.windows(2) {
        if pair[1].starts_with("used") {
            used = parse_kilo(pair[0]);
        }
        if pair[1].starts_with("available") {
            avail = parse_kilo(pair[0]);
        }
    }
    Some((used?, avail?))
}

fn parse_kilo(token: &str) -> Option<f64> {
    token
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}

struct SvmonSample {
    size_pages: f64,
    inuse_pages: f64,
    virtual_pages: f64,
}

fn parse_svmon(output: &str) -> Option<SvmonSample> {
    let line = output
        .lines()
        .find(|l| l.split_whitespace().next() == Some("memory"))?;
    let t: Vec<&str> = line.split_whitespace().collect();
    if t.len() < 6 {
        return None;
    }
    let size_pages: f64 = t[1].parse().ok()?;
    if size_pages <= 0.0 {
        return None;
    }
    Some(SvmonSample {
        size_pages,
        inuse_pages: t[2].parse().ok()?,
        virtual_pages: t[5].parse().ok()?,
    })
}

fn parse_lsps_pct(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let last = line.split_whitespace().last()?;
        let pct = last.strip_suffix('%')?;
        pct.parse().ok()
    })
}

struct SwapinfoSample {
    memory_pct: Option<f64>,
    total_pct: Option<f64>,
}

fn parse_swapinfo(output: &str) -> Option<SwapinfoSample> {
    let mut memory_pct = None;
    let mut total_pct = None;
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() < 5 {
            continue;
        }
        let pct = t[4].strip_suffix('%').and_then(|p| p.parse().ok());
        match t[0] {
            "memory" => memory_pct = pct,
            "total" => total_pct = pct,
            _ => {}
        }
    }
    if memory_pct.is_none() && total_pct.is_none() {
        return None;
    }
    Some(SwapinfoSample {
        memory_pct,
        total_pct,
    })
}

struct FreeSample {
    mem_used_pct: f64,
    swap_used_pct: Option<f64>,
}

fn parse_free(output: &str) -> Option<FreeSample> {
    // Modern procps has an "available" column; older trees only give
    // used/total, which overstates pressure but is the best on offer.
    let has_available = output
        .lines()
        .next()
        .is_some_and(|header| header.contains("available"));
    let mut mem = None;
    let mut swap = None;
    for line in output.lines() {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.first() == Some(&"Mem:") && t.len() >= 3 {
            let total: f64 = t[1].parse().ok()?;
            if total <= 0.0 {
                return None;
            }
            let used_pct = if has_available && t.len() >= 7 {
                let available: f64 = t[6].parse().ok()?;
                (total - available) / total * 100.0
            } else {
                let used: f64 = t[2].parse().ok()?;
                used / total * 100.0
            };
            mem = Some(used_pct.clamp(0.0, 100.0));
        }
        if t.first() == Some(&"Swap:") && t.len() >= 3 {
            let total: f64 = t[1].parse().ok()?;
            let used: f64 = t[2].parse().ok()?;
            swap = (total > 0.0).then(|| (used / total * 100.0).clamp(0.0, 100.0));
        }
    }
    mem.map(|mem_used_pct| FreeSample {
        mem_used_pct,
        swap_used_pct: swap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prtconf_memory_size() {
        let out = "\
System Configuration:  Oracle Corporation  i86pc
Memory size: 16384 Megabytes
System Peripherals (Software Nodes):
";
        assert_eq!(parse_prtconf_memory_mb(out), Some(16384.0));
    }

    #[test]
    fn kstat_single_statistic() {
        let out = "unix:0:system_pages:freemem\t1982774\n";
        assert_eq!(parse_kstat_value(out), Some(1982774.0));
    }

    #[test]
    fn swap_s_summary() {
        let out = "total: 1774912k bytes allocated + 420580k reserved = 2195492k used, 1636620k available\n";
        assert_eq!(parse_swap_s(out), Some((2195492.0, 1636620.0)));
    }

    #[test]
    fn svmon_global_row() {
        let out = "\
               size       inuse        free         pin     virtual  mmode
memory      4194304     4012345      181959      912345     2345678   Ded
pg space    1048576       52345
";
        let s = parse_svmon(out).unwrap();
        assert_eq!(s.size_pages, 4194304.0);
        assert_eq!(s.inuse_pages, 4012345.0);
        assert_eq!(s.virtual_pages, 2345678.0);
    }

    #[test]
    fn lsps_percent_used() {
        let out = "\
Total Paging Space   Percent Used
      1024MB               3%
";
        assert_eq!(parse_lsps_pct(out), Some(3.0));
    }

    #[test]
    fn swapinfo_memory_and_total_rows() {
        let out = "\
             Mb      Mb      Mb   PCT  START/      Mb
TYPE      AVAIL    USED    FREE  USED   LIMIT RESERVE  PRI  NAME
dev        4096     512    3584   13%       0       -    1  /dev/vg00/lvol2
reserve       -     778    -778
memory     7971    2333    5638   29%
total     12067    3623    8444   30%       -       0    -
";
        let s = parse_swapinfo(out).unwrap();
        assert_eq!(s.memory_pct, Some(29.0));
        assert_eq!(s.total_pct, Some(30.0));
    }

    #[test]
    fn free_with_available_column() {
        let out = "\
              total        used        free      shared  buff/cache   available
Mem:       16384256     8123456     1234567      123456     7026233     7890123
Swap:       2097152      123456     1973696
";
        let s = parse_free(out).unwrap();
        let expected = (16384256.0 - 7890123.0) / 16384256.0 * 100.0;
        assert!((s.mem_used_pct - expected).abs() < 0.01);
        let swap = s.swap_used_pct.unwrap();
        assert!((swap - 123456.0 / 2097152.0 * 100.0).abs() < 0.01);
    }

    #[test]
    fn free_legacy_layout_uses_used_column() {
        let out = "\
             total       used       free     shared    buffers     cached
Mem:       8167848    7831204     336644          0     111404    2634556
Swap:      1998844          0    1998844
";
        let s = parse_free(out).unwrap();
        assert!((s.mem_used_pct - 7831204.0 / 8167848.0 * 100.0).abs() < 0.01);
        assert_eq!(s.swap_used_pct, Some(0.0));
    }

    #[test]
    fn free_without_swap_configured() {
        let out = "\
              total        used        free      shared  buff/cache   available
Mem:        4039724     1234567      789012       45678     2016145     2567890
Swap:             0           0           0
";
        let s = parse_free(out).unwrap();
        assert!(s.swap_used_pct.is_none());
    }
}
