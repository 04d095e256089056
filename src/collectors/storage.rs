//! Storage-stack health beyond plain filesystems: ZFS pool state and
//! geometry on Solaris, LVM volume groups on AIX and HP-UX.
//!
//! The Solaris disk inventory deliberately goes through `iostat -En`
//! rather than `format`. Both list disks, but format is an interactive
//! tool and every command here must run unattended; format only remains
//! as a last-resort alternate and is always fed a closed stdin.

use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;

const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;
// An SMI/VTOC label cannot address past 2 TiB.
const VTOC_LIMIT_BYTES: u64 = 2 * 1024 * 1024 * 1024 * 1024;

pub struct SolarisStorage;

impl Collector for SolarisStorage {
    fn domain(&self) -> Domain {
        Domain::Storage
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.zpool_checks(cx) {
            cx.skip("zfs pool checks", &e);
        }
        if let Err(e) = self.disk_label_checks(cx) {
            cx.skip("disk label checks", &e);
        }
    }
}

impl SolarisStorage {
    fn zpool_checks(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let zpool = cx.tool("zpool")?;
        let out = run_tool(&zpool, &["list", "-H", "-o", "name,size,cap,health"])?;
        let pools = parse_zpool_list(&out);
        if pools.is_empty() {
            cx.transcript.info("no zfs pools present");
            return Ok(());
        }
        for pool in pools {
            cx.transcript.info(format!(
                "pool {}: {} at {:.0}% capacity, {}",
                pool.name, pool.size, pool.cap_pct, pool.health
            ));
            cx.record(
                Metric::new(Domain::Storage, "pool_capacity_pct", pool.cap_pct, "%", &zpool)
                    .subject(pool.name.clone()),
            );
            let degraded = if pool.health == "ONLINE" { 0.0 } else { 1.0 };
            cx.record(
                Metric::new(Domain::Storage, "pool_health_degraded", degraded, "", &zpool)
                    .subject(pool.name.clone())
                    .observed(pool.health.clone()),
            );
            if let Err(e) = self.ashift_check(cx, &pool.name) {
                cx.skip(&format!("ashift check for pool {}", pool.name), &e);
            }
        }
        Ok(())
    }

    /// Pools created with 512-byte sectors (ashift 9) on 4K flash pay a
    /// read-modify-write penalty on every sub-page write.
    fn ashift_check(&self, cx: &mut ScanContext<'_>, pool: &str) -> Result<(), CollectError> {
        let zdb = cx.tool("zdb")?;
        let config = run_tool(&zdb, &["-C", pool])?;
        let ashift = parse_zdb_ashift(&config).ok_or(CollectError::ParseMiss {
            tool: zdb.clone(),
            what: "vdev ashift",
        })?;
        cx.transcript
            .info(format!("pool {pool}: minimum ashift {ashift}"));
        if ashift >= 12 {
            return Ok(());
        }
        let zpool = cx.tool("zpool")?;
        let status = run_tool(&zpool, &["status", pool])?;
        let members = parse_pool_members(&status, pool);
        let iostat = cx.tool("iostat")?;
        let mut flash_member = None;
        for member in &members {
            let device = strip_slice(member);
            if let Ok(info) = run_tool(&iostat, &["-En", device]) {
                if is_ssd(&info, device) {
                    flash_member = Some(device.to_string());
                    break;
                }
            }
        }
        if let Some(device) = flash_member {
            cx.record(
                Metric::new(Domain::Storage, "pool_ashift_small_ssd", 1.0, "", &zdb)
                    .subject(pool)
                    .observed(format!("ashift={ashift} with flash member {device}")),
            );
        }
        Ok(())
    }

    fn disk_label_checks(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("lsblk")?;
        let disks = match cmd.as_str() {
            "format" => parse_format_disks(&run_tool("format", &[])?),
            _ => parse_iostat_en(&run_tool(&cmd, &["-En"])?),
        };
        if disks.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "disk inventory",
            });
        }
        for disk in disks {
            if is_optical(&disk.product) {
                cx.transcript
                    .info(format!("skipping optical device {}", disk.name));
                continue;
            }
            if let Err(e) = self.label_check(cx, &disk) {
                cx.skip(&format!("label check for {}", disk.name), &e);
            }
        }
        Ok(())
    }

    fn label_check(&self, cx: &mut ScanContext<'_>, disk: &DiskDevice) -> Result<(), CollectError> {
        let prtvtoc = cx.tool("prtvtoc")?;
        let slice2 = format!("/dev/rdsk/{}s2", disk.name);
        // The s2 backup slice only exists under an SMI/VTOC label, so a
        // failed read here means EFI/GPT.
        let Ok(out) = run_tool(&prtvtoc, &[&slice2]) else {
            cx.transcript
                .info(format!("disk {}: EFI/GPT label", disk.name));
            return Ok(());
        };
        cx.transcript
            .info(format!("disk {}: SMI/VTOC label", disk.name));
        if let Some(bytes) = disk.size_bytes {
            if bytes > VTOC_LIMIT_BYTES {
                cx.record(
                    Metric::new(Domain::Storage, "vtoc_label_large_disk", 1.0, "", &prtvtoc)
                        .subject(disk.name.clone())
                        .observed(format!("SMI/VTOC on {:.1} TiB disk", bytes as f64 / TIB)),
                );
            }
        }
        for part in parse_prtvtoc_partitions(&out) {
            // Slice 2 covers the whole disk from sector 0; not a data slice.
            if part.index == 2 || part.sector_count == 0 {
                continue;
            }
            if part.first_sector % 8 != 0 {
                cx.record(
                    Metric::new(Domain::Storage, "part_misaligned", 1.0, "", &prtvtoc)
                        .subject(format!("{} slice {}", disk.name, part.index))
                        .observed(format!("starts at sector {}", part.first_sector)),
                );
            }
        }
        Ok(())
    }
}

pub struct AixStorage;

impl Collector for AixStorage {
    fn domain(&self) -> Domain {
        Domain::Storage
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.volume_group_checks(cx) {
            cx.skip("volume group checks", &e);
        }
        if let Err(e) = self.physical_volume_inventory(cx) {
            cx.skip("physical volume inventory", &e);
        }
    }
}

impl AixStorage {
    fn volume_group_checks(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let lsvg = cx.tool("lsvg")?;
        let list = run_tool(&lsvg, &[])?;
        let names: Vec<&str> = list
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if names.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: lsvg,
                what: "volume group list",
            });
        }
        for vg in names {
            let detail = match run_tool(&lsvg, &[vg]) {
                Ok(d) => d,
                Err(e) => {
                    cx.skip(&format!("volume group {vg}"), &e);
                    continue;
                }
            };
            let free = parse_lsvg_field(&detail, "FREE PPs:");
            let stale = parse_lsvg_field(&detail, "STALE PPs:");
            let total = parse_lsvg_field(&detail, "TOTAL PPs:");
            cx.transcript.info(format!(
                "vg {vg}: {:.0} total PPs, {:.0} free, {:.0} stale",
                total.unwrap_or(0.0),
                free.unwrap_or(0.0),
                stale.unwrap_or(0.0)
            ));
            if let Some(free) = free {
                cx.record(
                    Metric::new(Domain::Storage, "vg_free_extents", free, "", &lsvg)
                        .subject(vg)
                        .observed(format!("{free:.0} free PPs")),
                );
            }
            if let Some(stale) = stale {
                cx.record(
                    Metric::new(Domain::Storage, "vg_stale_extents", stale, "", &lsvg)
                        .subject(vg)
                        .observed(format!("{stale:.0} stale PPs")),
                );
            }
        }
        Ok(())
    }

    fn physical_volume_inventory(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("lsblk")?;
        let out = run_tool(&cmd, &[])?;
        for line in out.lines().filter(|l| !l.trim().is_empty()).take(16) {
            cx.transcript.info(format!("  {}", line.trim_end()));
        }
        Ok(())
    }
}

pub struct HpuxStorage;

impl Collector for HpuxStorage {
    fn domain(&self) -> Domain {
        Domain::Storage
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.volume_group_checks(cx) {
            cx.skip("volume group checks", &e);
        }
    }
}

impl HpuxStorage {
    fn volume_group_checks(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let cmd = cx.tool("vgs")?;
        let out = run_tool(&cmd, &["-v"])?;
        let groups = parse_vgdisplay(&out);
        if groups.is_empty() {
            return Err(CollectError::ParseMiss {
                tool: cmd,
                what: "volume group display",
            });
        }
        for vg in groups {
            cx.transcript.info(format!(
                "vg {}: {:.0} free PE, {} stale LVs",
                vg.name,
                vg.free_pe.unwrap_or(0.0),
                vg.stale_lvs
            ));
            if let Some(free) = vg.free_pe {
                cx.record(
                    Metric::new(Domain::Storage, "vg_free_extents", free, "", &cmd)
                        .subject(vg.name.clone())
                        .observed(format!("{free:.0} free PE")),
                );
            }
            cx.record(
                Metric::new(
                    Domain::Storage,
                    "vg_stale_extents",
                    f64::from(vg.stale_lvs),
                    "",
                    &cmd,
                )
                .subject(vg.name.clone())
                .observed(format!("{} stale LVs", vg.stale_lvs)),
            );
        }
        Ok(())
    }
}

struct PoolRow {
    name: String,
    size: String,
    cap_pct: f64,
    health: String,
}

fn parse_zpool_list(output: &str) -> Vec<PoolRow> {
    output
        .lines()
        .filter_map(|line| {
            let t: Vec<&str> = line.split_whitespace().collect();
            if t.len() < 4 {
                return None;
            }
            let cap_pct = t[2].strip_suffix('%')?.parse().ok()?;
            Some(PoolRow {
                name: t[0].to_string(),
                size: t[1].to_string(),
                cap_pct,
                health: t[3].to_string(),
            })
        })
        .collect()
}

/// Smallest ashift across the vdev tree in `zdb -C` output.
fn parse_zdb_ashift(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ashift:")?.trim().parse().ok())
        .min()
}

/// Leaf devices from `zpool status` config, skipping the pool row, the
/// header and vdev grouping rows.
fn parse_pool_members(output: &str, pool: &str) -> Vec<String> {
    const GROUPS: &[&str] = &["mirror", "raidz", "spare", "log", "cache", "replacing"];
    let mut members = Vec::new();
    let mut in_config = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("config:") {
            in_config = true;
            continue;
        }
        if trimmed.starts_with("errors:") {
            break;
        }
        if !in_config {
            continue;
        }
        let Some(name) = trimmed.split_whitespace().next() else {
            continue;
        };
        if name == "NAME" || name == pool {
            continue;
        }
        if GROUPS.iter().any(|g| name.starts_with(g)) {
            continue;
        }
        if looks_like_device(name) {
            members.push(name.to_string());
        }
    }
    members
}

fn looks_like_device(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('c') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Drop a trailing slice suffix: c1t0d0s0 names the slice, c1t0d0 the disk.
fn strip_slice(device: &str) -> &str {
    if let Some(pos) = device.rfind('s') {
        let (head, tail) = device.split_at(pos);
        let digits = &tail[1..];
        if !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
            && head.chars().last().is_some_and(|c| c.is_ascii_digit())
        {
            return head;
        }
    }
    device
}

struct DiskDevice {
    name: String,
    product: String,
    size_bytes: Option<u64>,
}

/// Disk inventory out of `iostat -En` blocks. Each block starts with a
/// "Soft Errors:" header line naming the device, followed by Vendor and
/// Size detail lines.
fn parse_iostat_en(output: &str) -> Vec<DiskDevice> {
    let mut disks = Vec::new();
    let mut current: Option<DiskDevice> = None;
    for line in output.lines() {
        if !line.starts_with(' ') && line.contains("Soft Errors:") {
            if let Some(done) = current.take() {
                disks.push(done);
            }
            let name = line.split_whitespace().next().unwrap_or("").to_string();
            current = Some(DiskDevice {
                name,
                product: String::new(),
                size_bytes: None,
            });
        } else if let Some(disk) = current.as_mut() {
            let trimmed = line.trim();
            if trimmed.starts_with("Vendor:") || trimmed.starts_with("Model:") {
                disk.product = trimmed.to_string();
            } else if let Some(rest) = trimmed.strip_prefix("Size:") {
                // "Size: 500.10GB <500107862016 bytes>"
                if let Some(start) = rest.find('<') {
                    let digits: String = rest[start + 1..]
                        .chars()
                        .take_while(|c| c.is_ascii_digit())
                        .collect();
                    disk.size_bytes = digits.parse().ok();
                }
            }
        }
    }
    if let Some(done) = current.take() {
        disks.push(done);
    }
    disks
}

/// Disk list from non-interactive `format` output, the last-resort path.
/// Lines look like "0. c1t0d0 <ATA-Samsung SSD 860-1B6Q-465.76GB>".
fn parse_format_disks(output: &str) -> Vec<DiskDevice> {
    output
        .lines()
        .filter_map(|line| {
            let t: Vec<&str> = line.trim().split_whitespace().collect();
            if t.len() < 3 || !t[0].ends_with('.') {
                return None;
            }
            t[0].trim_end_matches('.').parse::<u32>().ok()?;
            let product = t[2..].join(" ");
            Some(DiskDevice {
                name: t[1].to_string(),
                size_bytes: parse_format_size(&product),
                product,
            })
        })
        .collect()
}

fn parse_format_size(product: &str) -> Option<u64> {
    let upper = product.to_uppercase();
    for (suffix, scale) in [("TB", 1e12), ("GB", 1e9)] {
        if let Some(end) = upper.find(suffix) {
            let head = &upper[..end];
            let start = head
                .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
                .map_or(0, |i| i + 1);
            if let Ok(value) = head[start..].parse::<f64>() {
                return Some((value * scale) as u64);
            }
        }
    }
    None
}

fn is_optical(product: &str) -> bool {
    let upper = product.to_uppercase();
    upper.contains("CD-ROM") || upper.contains("CDROM") || upper.contains("DVD")
}

fn is_ssd(info: &str, device: &str) -> bool {
    let upper = info.to_uppercase();
    upper.contains("SSD")
        || upper.contains("NVME")
        || upper.contains("SOLID STATE")
        || device.contains("nvme")
}

struct VtocPartition {
    index: u32,
    first_sector: u64,
    sector_count: u64,
}

fn parse_prtvtoc_partitions(output: &str) -> Vec<VtocPartition> {
    output
        .lines()
        .filter_map(|line| {
            if line.trim_start().starts_with('*') {
                return None;
            }
            let t: Vec<&str> = line.split_whitespace().collect();
            if t.len() < 6 {
                return None;
            }
            Some(VtocPartition {
                index: t[0].parse().ok()?,
                first_sector: t[3].parse().ok()?,
                sector_count: t[4].parse().ok()?,
            })
        })
        .collect()
}

/// Value following a labelled field in `lsvg <vg>` output.
fn parse_lsvg_field(output: &str, key: &str) -> Option<f64> {
    let pos = output.find(key)?;
    output[pos + key.len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

struct HpuxVolumeGroup {
    name: String,
    free_pe: Option<f64>,
    stale_lvs: u32,
}

fn parse_vgdisplay(output: &str) -> Vec<HpuxVolumeGroup> {
    let mut groups: Vec<HpuxVolumeGroup> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("VG Name") {
            groups.push(HpuxVolumeGroup {
                name: rest.trim().to_string(),
                free_pe: None,
                stale_lvs: 0,
            });
        } else if let Some(group) = groups.last_mut() {
            if let Some(rest) = trimmed.strip_prefix("Free PE") {
                group.free_pe = rest.trim().parse().ok();
            } else if let Some(rest) = trimmed.strip_prefix("LV Status") {
                if rest.contains("stale") {
                    group.stale_lvs += 1;
                }
            }
        }
    }
    groups
}
