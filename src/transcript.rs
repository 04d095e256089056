//! Dual-sink scan log: every line goes to the console (colored) and, when a
//! file sink is attached, to a plain-text transcript that later rides along
//! as the ticket attachment.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::Local;
use colored::Colorize;

use crate::domain::finding::Finding;

pub struct Transcript {
    file: Option<BufWriter<File>>,
}

impl Transcript {
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Transcript {
            file: Some(BufWriter::new(file)),
        })
    }

    pub fn console_only() -> Self {
        Transcript { file: None }
    }

    pub fn info(&mut self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        let ts = timestamp();
        println!("{} {} {}", format!("[{ts}]").dimmed(), "[INFO]".cyan(), msg);
        self.file_line(&format!("[{ts}] [INFO] {msg}"));
    }

    pub fn warn(&mut self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        let ts = timestamp();
        println!("{} {} {}", format!("[{ts}]").dimmed(), "[WARN]".yellow(), msg);
        self.file_line(&format!("[{ts}] [WARN] {msg}"));
    }

    pub fn error(&mut self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        let ts = timestamp();
        println!(
            "{} {} {}",
            format!("[{ts}]").dimmed(),
            "[ERROR]".red().bold(),
            msg
        );
        self.file_line(&format!("[{ts}] [ERROR] {msg}"));
    }

    pub fn ok(&mut self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        let ts = timestamp();
        println!("{} {} {}", format!("[{ts}]").dimmed(), "[ OK ]".green(), msg);
        self.file_line(&format!("[{ts}] [ OK ] {msg}"));
    }

    pub fn section(&mut self, title: &str) {
        let banner = format!("═══ {title} ═══");
        println!("\n{}", banner.cyan().bold());
        self.file_line("");
        self.file_line(&banner);
    }

    pub fn finding(&mut self, finding: &Finding) {
        let plain = format!(
            "  [{}] {}: current {}, threshold {}",
            finding.severity, finding.description, finding.current, finding.threshold
        );
        println!(
            "  [{}] {}: current {}, threshold {}",
            finding.severity.colorized(),
            finding.description,
            finding.current,
            finding.threshold
        );
        self.file_line(&plain);
    }

    pub fn flush(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = file.flush();
        }
    }

    fn file_line(&mut self, line: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{line}");
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
