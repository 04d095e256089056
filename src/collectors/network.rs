//! TCP socket states, retransmission counters and interface error totals.
//!
//! `ss` is preferred where it exists; everywhere else the checks fall back
//! to netstat, whose output differs just enough per platform to matter.
//! illumos netstat prints local endpoints as host.port while Linux and ss
//! print host:port, so anything matching ports handles both.

use std::collections::HashSet;

use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;
use crate::platform::OsFamily;

// netstat -i on the commercial Unixes: Name Mtu Net/Dest Address Ipkts
// Ierrs Opkts Oerrs. net-tools on Linux: Iface MTU RX-OK RX-ERR RX-DRP
// RX-OVR TX-OK TX-ERR.
const UNIX_IERRS_COLUMN: usize = 5;
const UNIX_OERRS_COLUMN: usize = 7;
const LINUX_RX_ERR_COLUMN: usize = 3;
const LINUX_TX_ERR_COLUMN: usize = 7;

pub struct SolarisNetwork;

impl Collector for SolarisNetwork {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = socket_state_check(cx) {
            cx.skip("socket state survey", &e);
        }
        if let Err(e) = self.retrans_check(cx) {
            cx.skip("tcp retransmission counters", &e);
        }
        if let Err(e) = interface_error_check(cx, UNIX_IERRS_COLUMN, UNIX_OERRS_COLUMN) {
            cx.skip("interface error counters", &e);
        }
    }
}

impl SolarisNetwork {
    /// Retransmissions come from the per-protocol MIB dump, which prints
    /// name = value pairs rather than prose.
    fn retrans_check(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let netstat = cx.tool("netstat")?;
        let out = run_tool(&netstat, &["-s", "-P", "tcp"])?;
        let segs = parse_mib_counter(&out, "tcpRetransSegs").ok_or(CollectError::ParseMiss {
            tool: netstat.clone(),
            what: "tcpRetransSegs counter",
        })?;
        record_retrans(cx, segs, &netstat);
        Ok(())
    }
}

pub struct AixNetwork;

impl Collector for AixNetwork {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = socket_state_check(cx) {
            cx.skip("socket state survey", &e);
        }
        if let Err(e) = summary_retrans_check(cx) {
            cx.skip("tcp retransmission counters", &e);
        }
        if let Err(e) = interface_error_check(cx, UNIX_IERRS_COLUMN, UNIX_OERRS_COLUMN) {
            cx.skip("interface error counters", &e);
        }
    }
}

pub struct HpuxNetwork;

impl Collector for HpuxNetwork {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = socket_state_check(cx) {
            cx.skip("socket state survey", &e);
        }
        if let Err(e) = summary_retrans_check(cx) {
            cx.skip("tcp retransmission counters", &e);
        }
        if let Err(e) = interface_error_check(cx, UNIX_IERRS_COLUMN, UNIX_OERRS_COLUMN) {
            cx.skip("interface error counters", &e);
        }
    }
}

pub struct LinuxNetwork;

impl Collector for LinuxNetwork {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = socket_state_check(cx) {
            cx.skip("socket state survey", &e);
        }
        if let Err(e) = summary_retrans_check(cx) {
            cx.skip("tcp retransmission counters", &e);
        }
        if let Err(e) = interface_error_check(cx, LINUX_RX_ERR_COLUMN, LINUX_TX_ERR_COLUMN) {
            cx.skip("interface error counters", &e);
        }
    }
}

/// netstat arguments for a full tcp socket listing on this family.
pub(crate) fn netstat_args(family: OsFamily) -> &'static [&'static str] {
    match family {
        OsFamily::Solaris => &["-an", "-f", "inet", "-P", "tcp"],
        _ => &["-an"],
    }
}

/// Whether any LISTEN row in a socket listing carries the given port.
pub(crate) fn port_is_listening(listing: &str, port: u16) -> bool {
    let dot = format!(".{port}");
    let colon = format!(":{port}");
    listing.lines().any(|line| {
        let t: Vec<&str> = line.split_whitespace().collect();
        let listening = t.iter().any(|s| *s == "LISTEN" || *s == "LISTENING");
        listening && t.iter().any(|s| s.ends_with(&dot) || s.ends_with(&colon))
    })
}

fn socket_state_check(cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
    let cmd = cx.tool("ss")?;
    let out = if cmd == "ss" {
        run_tool(&cmd, &["-tan"])?
    } else {
        run_tool(&cmd, netstat_args(cx.family()))?
    };
    let states = parse_connection_states(&out);
    cx.transcript.info(format!(
        "tcp sockets: {} established, {} time-wait, {} close-wait",
        states.established, states.time_wait, states.close_wait
    ));
    cx.record(
        Metric::new(
            Domain::Network,
            "time_wait_count",
            f64::from(states.time_wait),
            "",
            &cmd,
        )
        .observed(format!("{} sockets in TIME_WAIT", states.time_wait)),
    );
    cx.record(
        Metric::new(
            Domain::Network,
            "close_wait_count",
            f64::from(states.close_wait),
            "",
            &cmd,
        )
        .observed(format!("{} sockets in CLOSE_WAIT", states.close_wait)),
    );
    Ok(())
}

/// Retransmissions from the prose `netstat -s` summary. Matches the line
/// mentioning retransmits; some net-tools builds spell it "retransmited".
fn summary_retrans_check(cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
    let netstat = cx.tool("netstat")?;
    let out = run_tool(&netstat, &["-s"])?;
    let segs = parse_retransmit_line(&out).ok_or(CollectError::ParseMiss {
        tool: netstat.clone(),
        what: "retransmit counter",
    })?;
    record_retrans(cx, segs, &netstat);
    Ok(())
}

fn record_retrans(cx: &mut ScanContext<'_>, segs: f64, tool: &str) {
    cx.record(
        Metric::new(Domain::Network, "tcp_retrans_segs", segs, "", tool)
            .observed(format!("{segs:.0} segments retransmitted since boot")),
    );
}

fn interface_error_check(
    cx: &mut ScanContext<'_>,
    in_col: usize,
    out_col: usize,
) -> Result<(), CollectError> {
    let netstat = cx.tool("netstat")?;
    let out = run_tool(&netstat, &["-i"])?;
    let total = parse_interface_errors(&out, in_col, out_col);
    cx.record(
        Metric::new(Domain::Network, "if_error_count", total, "", &netstat)
            .observed(format!("{total:.0} input+output errors across interfaces")),
    );
    Ok(())
}

#[derive(Default)]
struct ConnectionStates {
    established: u32,
    time_wait: u32,
    close_wait: u32,
}

fn parse_connection_states(output: &str) -> ConnectionStates {
    let mut states = ConnectionStates::default();
    for line in output.lines() {
        for token in line.split_whitespace() {
            match token {
                "ESTABLISHED" | "ESTAB" => states.established += 1,
                "TIME_WAIT" | "TIME-WAIT" => states.time_wait += 1,
                "CLOSE_WAIT" | "CLOSE-WAIT" => states.close_wait += 1,
                _ => {}
            }
        }
    }
    states
}

fn parse_mib_counter(output: &str, counter: &str) -> Option<f64> {
    let pos = output.find(counter)?;
    output[pos + counter.len()..]
        .split_whitespace()
        .find(|t| *t != "=")
        .and_then(|t| t.trim_start_matches('=').parse().ok())
}

fn parse_retransmit_line(output: &str) -> Option<f64> {
    let line = output.lines().find(|l| l.contains("retransmit"))?;
    line.split_whitespace()
        .find_map(|t| t.parse::<f64>().ok())
}

/// Sum of input and output errors over physical interfaces. Loopback is
/// skipped and each interface counted once even when netstat prints a row
/// per address family.
fn parse_interface_errors(output: &str, in_col: usize, out_col: usize) -> f64 {
    let mut total = 0.0;
    let mut seen = HashSet::new();
    for line in output.lines().skip(1) {
        let t: Vec<&str> = line.split_whitespace().collect();
        if t.len() <= out_col {
            continue;
        }
        let name = t[0];
        if name == "Name" || name == "Iface" || name.starts_with("lo") {
            continue;
        }
        let (Ok(ierrs), Ok(oerrs)) = (t[in_col].parse::<f64>(), t[out_col].parse::<f64>()) else {
            continue;
        };
        if !seen.insert(name.to_string()) {
            continue;
        }
        total += ierrs + oerrs;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_states_from_netstat_listing() {
        let out = "\
TCP: IPv4
   Local Address        Remote Address    Swind Send-Q Rwind Recv-Q    State
-------------------- -------------------- ----- ------ ----- ------ -----------
10.0.0.5.22          10.0.0.9.50312      128000      0 128000      0 ESTABLISHED
10.0.0.5.1521        10.0.0.9.50313      128000      0 128000      0 ESTABLISHED
10.0.0.5.80          10.0.0.9.50314      128000      0 128000      0 TIME_WAIT
10.0.0.5.80          10.0.0.9.50315      128000      0 128000      0 CLOSE_WAIT
      *.22                 *.*                0      0 128000      0 LISTEN
";
        let states = parse_connection_states(out);
        assert_eq!(states.established, 2);
        assert_eq!(states.time_wait, 1);
        assert_eq!(states.close_wait, 1);
    }

    #[test]
    fn connection_states_from_ss_listing() {
        let out = "\
State      Recv-Q Send-Q Local Address:Port  Peer Address:Port
LISTEN     0      128          0.0.0.0:22         0.0.0.0:*
ESTAB      0      0         10.0.0.5:22        10.0.0.9:50312
TIME-WAIT  0      0         10.0.0.5:80        10.0.0.9:50314
TIME-WAIT  0      0         10.0.0.5:80        10.0.0.9:50315
CLOSE-WAIT 1      0         10.0.0.5:443       10.0.0.9:50316
";
        let states = parse_connection_states(out);
        assert_eq!(states.established, 1);
        assert_eq!(states.time_wait, 2);
        assert_eq!(states.close_wait, 1);
    }

    #[test]
    fn listening_port_matches_both_endpoint_syntaxes() {
        let illumos = "      *.5432               *.*             0      0 128000      0 LISTEN\n";
        let linux = "tcp        0      0 0.0.0.0:5432       0.0.0.0:*          LISTEN\n";
        assert!(port_is_listening(illumos, 5432));
        assert!(port_is_listening(linux, 5432));
        assert!(!port_is_listening(illumos, 543));
        assert!(!port_is_listening(linux, 1521));
        // Established rows to the port do not count as listening.
        let established = "tcp   0   0 10.0.0.5:44310   10.0.0.9:5432   ESTABLISHED\n";
        assert!(!port_is_listening(established, 5432));
    }

    #[test]
    fn mib_counter_extraction_tolerates_spacing() {
        let out = "\
TCP\ttcpRtoAlgorithm     =     4\ttcpRtoMin           =   400
\ttcpRetransSegs      =   126\ttcpRetransBytes     = 51224
";
        assert_eq!(parse_mib_counter(out, "tcpRetransSegs"), Some(126.0));
        assert_eq!(parse_mib_counter(out, "tcpInErrs"), None);
    }

    #[test]
    fn retransmit_line_variants() {
        let aix = "tcp:\n\t126 data packets (51224 bytes) retransmitted\n";
        assert_eq!(parse_retransmit_line(aix), Some(126.0));
        let linux = "Tcp:\n    97 segments retransmited\n";
        assert_eq!(parse_retransmit_line(linux), Some(97.0));
        assert_eq!(parse_retransmit_line("tcp:\n\tno counters\n"), None);
    }

    #[test]
    fn interface_errors_sum_and_skip_loopback() {
        let out = "\
Name  Mtu  Net/Dest      Address        Ipkts    Ierrs Opkts    Oerrs Collis Queue
lo0   8232 loopback      localhost      151424   0     151424   0     0      0
net0  1500 10.0.0.0      10.0.0.5       9882376  12    8761221  3     0      0
net1  1500 192.168.0.0   192.168.0.5    112233   0     99881    1     0      0
";
        let total = parse_interface_errors(out, UNIX_IERRS_COLUMN, UNIX_OERRS_COLUMN);
        assert_eq!(total, 16.0);
    }

    #[test]
    fn interface_errors_count_each_interface_once() {
        // AIX prints one row per address per interface with identical counters.
        let out = "\
Name  Mtu   Network     Address            Ipkts Ierrs    Opkts Oerrs  Coll
en0   1500  link#2      0.9.6b.2e.a2.c5  2556617     4  2087469     1     0
en0   1500  9.3.240     rhea             2556617     4  2087469     1     0
lo0   16896 link#1                       1175144     0  1175373     0     0
lo0   16896 127         loopback         1175144     0  1175373     0     0
";
        let total = parse_interface_errors(out, UNIX_IERRS_COLUMN, UNIX_OERRS_COLUMN);
        assert_eq!(total, 5.0);
    }

    #[test]
    fn linux_interface_table_columns() {
        let out = "\
Kernel Interface table
Iface      MTU    RX-OK RX-ERR RX-DRP RX-OVR    TX-OK TX-ERR TX-DRP TX-OVR Flg
eth0      1500  8244332      7      0 0       6171429      2      0     0 BMRU
lo       65536   151424      0      0 0        151424      0      0     0 LRU
";
        let total = parse_interface_errors(out, LINUX_RX_ERR_COLUMN, LINUX_TX_ERR_COLUMN);
        assert_eq!(total, 9.0);
    }
}
