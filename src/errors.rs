use thiserror::Error;

/// Platform detection can only fail outright when the host gives us nothing
/// to work with. An unrecognized but living system still classifies as
/// `OsFamily::Unknown` rather than erroring.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("cannot classify this host: no release marker files and uname failed ({0})")]
    NoSignals(std::io::Error),
}

/// Per-check failures inside a collector. These are handled where they occur:
/// the check is skipped with a transcript warning and the scan moves on.
/// Nothing in this enum ever aborts a run.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Neither the preferred tool nor any platform alternate resolved.
    #[error("tool '{0}' is unavailable on this host")]
    ToolUnavailable(String),

    /// The tool ran but produced nothing usable.
    #[error("'{0}' produced no usable output")]
    CommandFailed(String),

    /// Output did not match the fixed layout expected on this platform.
    #[error("could not parse {what} from '{tool}' output")]
    ParseMiss { tool: String, what: &'static str },

    /// Local I/O failure, only reachable from the throughput benchmark.
    #[error("{what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}
