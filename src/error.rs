use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetblastError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Failed to parse {what}: {reason}")]
    ParseFailure { what: &'static str, reason: String },

    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    #[error("Throughput test failed: {0}")]
    ProbeFailed(String),

    #[error("Throughput test timed out after {0}s")]
    ProbeTimeout(u64),

    #[error("Malformed throughput output: {0}")]
    MalformedOutput(String),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl NetblastError {
    pub fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        Self::ParseFailure {
            what,
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole run.
    ///
    /// Probe errors only ever mark a single result as unmeasured.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ProbeFailed(_) | Self::ProbeTimeout(_) | Self::MalformedOutput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NetblastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(NetblastError::NetworkUnavailable("dns".into()).is_fatal());
        assert!(NetblastError::parse("location", "missing loc").is_fatal());
        assert!(NetblastError::ToolMissing("iperf3".into()).is_fatal());
        assert!(!NetblastError::ProbeTimeout(15).is_fatal());
        assert!(!NetblastError::ProbeFailed("exit 1".into()).is_fatal());
        assert!(!NetblastError::MalformedOutput("no end".into()).is_fatal());
    }

    #[test]
    fn test_parse_failure_message() {
        let err = NetblastError::parse("server feed", "expected array");
        assert_eq!(
            err.to_string(),
            "Failed to parse server feed: expected array"
        );
    }
}
