use thiserror::Error;

/// Errors raised while validating a proposed or stored `Resource`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one threshold must be configured")]
    NoThresholdsConfigured,
    #[error("thresholds for metric {metric} must satisfy low < high < critical")]
    ThresholdOrdering { metric: String },
    #[error("exactly one of size_step_percent or single_step must be set")]
    AmbiguousStepPolicy,
    #[error("maximum_size is required by policy and must be <= {ceiling}")]
    MaximumSizeRequired { ceiling: u64 },
    #[error("{0}")]
    Other(String),
}

/// The two well-known sentinels a plugin's `check_resource_allowed` may
/// return, plus an open-ended descriptive error for anything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("no configuration allowed for this asset type")]
    NoConfigurationAllowed,
    #[error("no configuration provided for this asset type")]
    NoConfigurationProvided,
    #[error("{0}")]
    Other(String),
}

/// Distinguished "asset not found" result from `get_asset_status` and
/// `set_asset_size`, modeled as a sum type rather than string matching on
/// error messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetLookupError {
    #[error("asset not found at backend")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

/// Classification of a `set_asset_size` outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ResizeOutcome {
    Succeeded,
    /// User fault: quota exceeded, size mismatch with backend, etc.
    Failed(String),
    /// Infrastructure/operator fault: timeout, transient RPC error, etc.
    Errored(String),
}

impl ResizeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ResizeOutcome::Succeeded => "succeeded",
            ResizeOutcome::Failed(_) => "failed",
            ResizeOutcome::Errored(_) => "errored",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ResizeOutcome::Succeeded => None,
            ResizeOutcome::Failed(m) | ResizeOutcome::Errored(m) => Some(m),
        }
    }
}

/// Database access errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("row violates an invariant: {0}")]
    Invariant(String),
}

/// Startup configuration errors: missing environment variables, unparsable
/// values, or a malformed YAML configuration file. All of these are fatal
/// at process start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
