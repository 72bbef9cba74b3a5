//! Error types for the control-plane operator

use thiserror::Error;

/// Errors that can occur while reconciling managed services
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The object does not exist in the store
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A compiled-in manifest template could not be decoded
    #[error("Template {name} is invalid: {message}")]
    Template { name: String, message: String },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The (last successful, desired) version pair matches no known sync path
    #[error("unrecognized state: current version {current:?}, desired version {desired:?}")]
    UnrecognizedState { current: String, desired: String },

    /// Secret.stringData and Secret.data disagree on a key
    #[error("Secret.stringData[{key:?}] conflicts with Secret.data[{key:?}]")]
    SecretConflict { key: String },

    /// Injected or store-specific failure that is not a Kubernetes API error
    #[error("Store error: {0}")]
    StoreError(String),

    /// Errors collected from independent reconcile steps
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<Error>),
}

/// Result type for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

fn join_errors(errors: &[Error]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => format!(
            "[{}]",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

impl Error {
    /// Whether the object was simply absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error is worth retrying soon
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::StoreError(_) | Error::NotFound { .. } => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retriable),
            _ => false,
        }
    }

    /// Collapse a list of step errors into a single result
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }
}
