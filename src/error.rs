//! Error types for the worktime scaler

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML parse error
    #[error("Failed to parse config: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Time zone name could not be resolved
    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),

    /// Clock value is not in HH:MM form
    #[error("Invalid time format {0:?}, expected HH:MM")]
    InvalidTimeFormat(String),

    /// A calendar label pattern failed to compile
    #[error("Invalid {kind} pattern {pattern:?}: {source}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Remote calendar could not be fetched or parsed
    #[error("Calendar error: {0}")]
    CalendarError(String),

    /// Credentials could not be loaded or exchanged for a token
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Cloud provider API returned an error
    #[error("Cloud API error (status {status}): {message}")]
    CloudApi { status: u16, message: String },

    /// AWS SDK call failed
    #[error("AWS API error: {0}")]
    AwsError(String),

    /// The cluster or node group already has an operation in flight
    #[error("Cluster busy: {0}")]
    ClusterBusy(String),

    /// No saved state exists for the pool
    #[error("No saved state found for node pool: {pool}")]
    NoSavedState { pool: String },

    /// Unknown cloud provider kind in the configuration
    #[error("Unsupported cloud provider: {kind}")]
    UnsupportedProvider { kind: String },

    /// Bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// True when a restore found nothing to restore
    pub fn is_no_saved_state(&self) -> bool {
        matches!(self, Error::NoSavedState { .. })
    }

    /// True when the provider rejected a call because another operation is running
    pub fn is_cluster_busy(&self) -> bool {
        matches!(self, Error::ClusterBusy(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
