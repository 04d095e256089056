//! Database engine discovery. Presence comes from the process table,
//! corroborated against listening sockets; connection counts are fetched
//! only where the engine's own client tool happens to be installed.

use tracing::debug;

use crate::collectors::network::{netstat_args, port_is_listening};
use crate::collectors::{run_tool, Collector, ScanContext};
use crate::domain::finding::{Domain, Metric};
use crate::errors::CollectError;

/// Process-name fingerprints for the engines commonly run on commercial
/// Unix. The postgres entry matches the worker-title form; postmaster
/// covers older installs.
const DB_SIGNATURES: &[(&str, &str)] = &[
    ("Oracle", "ora_pmon_"),
    ("MySQL/MariaDB", "mysqld"),
    ("PostgreSQL", "postgres:"),
    ("PostgreSQL", "postmaster"),
    ("Db2", "db2sysc"),
    ("Sybase ASE", "dataserver"),
    ("Informix", "oninit"),
    ("MongoDB", "mongod"),
    ("SQL Server", "sqlservr"),
];

/// Default listener ports worth checking against the socket table.
const DB_PORTS: &[(u16, &str)] = &[
    (1521, "Oracle"),
    (3306, "MySQL/MariaDB"),
    (5432, "PostgreSQL"),
    (1433, "SQL Server"),
    (27017, "MongoDB"),
];

pub struct DatabaseProbe;

impl Collector for DatabaseProbe {
    fn domain(&self) -> Domain {
        Domain::Database
    }

    fn collect(&self, cx: &mut ScanContext<'_>) {
        if let Err(e) = self.survey(cx) {
            cx.skip("database survey", &e);
        }
    }
}

impl DatabaseProbe {
    fn survey(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let ps = cx.tool("ps")?;
        let table = run_tool(&ps, &["-ef"])?;
        let engines = detect_engines(&table);
        if engines.is_empty() {
            cx.transcript.info("no database engine processes found");
            return Ok(());
        }
        for engine in &engines {
            cx.transcript
                .info(format!("detected {} ({})", engine.name, engine.process));
        }
        match self.socket_listing(cx) {
            Some(listing) => {
                for engine in &engines {
                    for (port, owner) in DB_PORTS {
                        if *owner == engine.name && port_is_listening(&listing, *port) {
                            cx.transcript
                                .info(format!("{} listening on port {port}", engine.name));
                        }
                    }
                }
            }
            None => cx
                .transcript
                .info("socket listing unavailable, skipping port corroboration"),
        }
        for engine in &engines {
            let result = match engine.name {
                "MySQL/MariaDB" => self.mysql_introspection(cx),
                "PostgreSQL" => self.postgres_introspection(cx),
                _ => Ok(()),
            };
            if let Err(e) = result {
                cx.skip(&format!("{} introspection", engine.name), &e);
            }
        }
        Ok(())
    }

    fn socket_listing(&self, cx: &mut ScanContext<'_>) -> Option<String> {
        let cmd = cx.tool("ss").ok()?;
        let out = if cmd == "ss" {
            run_tool(&cmd, &["-tln"])
        } else {
            run_tool(&cmd, netstat_args(cx.family()))
        };
        out.ok()
    }

    fn mysql_introspection(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let Ok(mysqladmin) = cx.tool("mysqladmin") else {
            debug!("mysqladmin not present, skipping connection count");
            return Ok(());
        };
        let out = run_tool(&mysqladmin, &["status"])?;
        let threads = parse_mysql_threads(&out).ok_or(CollectError::ParseMiss {
            tool: mysqladmin.clone(),
            what: "Threads count",
        })?;
        cx.record(
            Metric::new(Domain::Database, "db_active_connections", threads, "", &mysqladmin)
                .subject("MySQL/MariaDB")
                .observed(format!("{threads:.0} threads connected")),
        );
        Ok(())
    }

    fn postgres_introspection(&self, cx: &mut ScanContext<'_>) -> Result<(), CollectError> {
        let Ok(psql) = cx.tool("psql") else {
            debug!("psql not present, skipping connection count");
            return Ok(());
        };
        let out = run_tool(&psql, &["-tAc", "select count(*) from pg_stat_activity"])?;
        let count: f64 = out.trim().parse().map_err(|_| CollectError::ParseMiss {
            tool: psql.clone(),
            what: "pg_stat_activity count",
        })?;
        cx.record(
            Metric::new(Domain::Database, "db_active_connections", count, "", &psql)
                .subject("PostgreSQL")
                .observed(format!("{count:.0} active backends")),
        );
        Ok(())
    }
}

struct DetectedEngine {
    name: &'static str,
    process: String,
}

/// First matching process token per engine, in process-table order.
fn detect_engines(table: &str) -> Vec<DetectedEngine> {
    let mut engines: Vec<DetectedEngine> = Vec::new();
    for line in table.lines() {
        for token in line.split_whitespace() {
            for (name, signature) in DB_SIGNATURES {
                if token.contains(signature) && !engines.iter().any(|e| e.name == *name) {
                    engines.push(DetectedEngine {
                        name,
                        process: token.to_string(),
                    });
                }
            }
        }
    }
    engines
}

fn parse_mysql_threads(output: &str) -> Option<f64> {
    let pos = output.find("Threads:")?;
    output[pos + "Threads:".len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}
