use thiserror::Error;

/// Errors raised while compiling a schema definition.
///
/// These are load-time only: a schema that fails compilation is never activated,
/// so none of them can surface in the middle of a check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate namespace: {0}")]
    DuplicateNamespace(String),

    #[error("Duplicate declaration '{name}' in namespace '{namespace}'")]
    DuplicateDeclaration { namespace: String, name: String },

    #[error(
        "Relation '{namespace}#{relation}' allows unknown subject namespace '{subject_namespace}'"
    )]
    UnknownSubjectNamespace {
        namespace: String,
        relation: String,
        subject_namespace: String,
    },

    #[error(
        "Relation '{namespace}#{relation}' allows unknown subject set '{subject_namespace}#{subject_relation}'"
    )]
    UnknownSubjectRelation {
        namespace: String,
        relation: String,
        subject_namespace: String,
        subject_relation: String,
    },

    #[error("Permission '{namespace}#{permission}' references unknown relation '{relation}'")]
    UnresolvedRelation {
        namespace: String,
        permission: String,
        relation: String,
    },

    #[error("Permission '{namespace}#{permission}' references unknown permission '{reference}'")]
    UnresolvedPermission {
        namespace: String,
        permission: String,
        reference: String,
    },

    #[error(
        "Permission '{namespace}#{permission}' can never reach a relation through its permission references"
    )]
    CyclicPermission { namespace: String, permission: String },

    #[error("Invalid schema document: {0}")]
    InvalidDocument(String),
}

/// Failures reported by a tuple index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Tuple index unavailable: {0}")]
    Unavailable(String),

    #[error("Tuple index timed out")]
    Timeout,

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Internal index error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors returned to callers of a permission check.
///
/// A `false` answer is never an error. `StoreUnavailable` means the answer could
/// not be determined and must not be read as a denial.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Unknown permission '{permission}' in namespace '{namespace}'")]
    UnknownPermission { namespace: String, permission: String },

    #[error("Maximum recursion depth {max_depth} exceeded")]
    DepthExceeded { max_depth: u32 },

    #[error("Tuple store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CheckError {
    /// Whether the caller may retry the same check unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckError::StoreUnavailable(_))
    }
}

impl From<IndexError> for CheckError {
    fn from(err: IndexError) -> Self {
        CheckError::StoreUnavailable(err.to_string())
    }
}

/// Errors raised while loading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to initialise tracing: {0}")]
    Tracing(String),
}
