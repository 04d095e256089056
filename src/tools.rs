//! Tool resolution with per-platform alternates.
//!
//! Collectors ask for a logical tool name ("lsblk", "ss") and get back the
//! concrete command that exists on this host, falling through a short list
//! of platform-appropriate substitutes before giving up. Resolutions are
//! cached for the life of the scan so repeated lookups never re-probe PATH.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::platform::OsFamily;

/// Outcome of resolving a logical tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The command to invoke: either the requested tool or an alternate.
    Command(String),
    Unavailable,
}

impl Resolution {
    pub fn command(&self) -> Option<&str> {
        match self {
            Resolution::Command(cmd) => Some(cmd),
            Resolution::Unavailable => None,
        }
    }
}

/// Platform-specific substitutes, tried in order after the tool itself.
fn alternates(family: OsFamily, logical: &str) -> &'static [&'static str] {
    match (family, logical) {
        (OsFamily::Aix, "lsblk") => &["lspv"],
        (OsFamily::Aix, "ss") => &["netstat"],
        (OsFamily::Aix, "sar") => &["vmstat"],
        (OsFamily::HpUx, "vgs") => &["vgdisplay"],
        (OsFamily::HpUx, "lvs") => &["lvdisplay"],
        (OsFamily::HpUx, "pvs") => &["pvdisplay"],
        (OsFamily::HpUx, "lsblk") => &["ioscan"],
        (OsFamily::HpUx, "ss") => &["netstat"],
        // `format` is last resort on Solaris: it works without a ZFS stack
        // but needs care, since invoking it bare drops into an interactive
        // prompt. Callers must feed it a closed stdin and read only the
        // disk listing printed before the prompt.
        (OsFamily::Solaris, "lsblk") => &["iostat", "format"],
        (OsFamily::Solaris, "ss") => &["netstat"],
        (OsFamily::Solaris, "free") => &["vmstat"],
        (OsFamily::Linux, "ss") => &["netstat"],
        _ => &[],
    }
}

pub struct ToolResolver {
    family: OsFamily,
    probe: Box<dyn Fn(&str) -> bool>,
    cache: RefCell<HashMap<String, Resolution>>,
}

impl ToolResolver {
    pub fn new(family: OsFamily) -> Self {
        Self::with_probe(family, Box::new(|name| find(name).is_some()))
    }

    /// Resolver with an injected existence probe, for tests and dry runs.
    pub fn with_probe(family: OsFamily, probe: Box<dyn Fn(&str) -> bool>) -> Self {
        ToolResolver {
            family,
            probe,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, logical: &str) -> Resolution {
        if let Some(hit) = self.cache.borrow().get(logical) {
            return hit.clone();
        }
        let resolution = self.probe_chain(logical);
        match &resolution {
            Resolution::Command(cmd) if cmd == logical => {
                debug!(tool = logical, "resolved directly")
            }
            Resolution::Command(cmd) => {
                debug!(tool = logical, alternate = %cmd, "resolved via alternate")
            }
            Resolution::Unavailable => debug!(tool = logical, "unavailable"),
        }
        self.cache
            .borrow_mut()
            .insert(logical.to_string(), resolution.clone());
        resolution
    }

    fn probe_chain(&self, logical: &str) -> Resolution {
        if (self.probe)(logical) {
            return Resolution::Command(logical.to_string());
        }
        for alternate in alternates(self.family, logical) {
            if (self.probe)(alternate) {
                return Resolution::Command((*alternate).to_string());
            }
        }
        Resolution::Unavailable
    }
}

/// Search PATH, then the admin directories that legacy Unix login shells
/// often leave off PATH for non-root users.
pub fn find(name: &str) -> Option<PathBuf> {
    if let Some(p) = find_in_path(name) {
        return Some(p);
    }

    let admin_dirs = [
        "/usr/sbin",
        "/sbin",
        "/usr/bin",
        "/opt/csw/bin",
        "/opt/freeware/bin",
        "/usr/local/bin",
    ];
    for dir in &admin_dirs {
        let p = PathBuf::from(dir).join(name);
        if p.is_file() {
            return Some(p);
        }
    }

    None
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

pub fn on_path(name: &str) -> bool {
    find(name).is_some()
}
