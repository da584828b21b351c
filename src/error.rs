use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or cache key that caused the error (e.g., "store.port", "quotas:abc")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "redis", "memory", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the pairing pipeline.
///
/// `NotFound` is expected traffic (it drives the compute path); every other
/// variant is surfaced to the immediate caller without internal retries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Store backend error: {message}{}", format_context(.context))]
    Backend {
        message: String,
        context: ErrorContext,
    },

    #[error("Unable to resolve cache miss at stage '{stage}': {message}")]
    Compute { stage: String, message: String },

    #[error("Model declined to produce a result: {reason}")]
    ModelAbort { reason: String },

    #[error("Account {account_id} has insufficient quota (remaining: {remaining})")]
    QuotaExhausted { account_id: String, remaining: i64 },

    #[error("Value at {key} is not an integer counter: {value:?}")]
    InvalidCounter { key: String, value: String },

    #[error("Failed to fetch {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    pub fn backend(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Backend {
            message: msg.into(),
            context,
        }
    }

    pub fn compute(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Compute {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Error::QuotaExhausted { .. })
    }

    /// Whether a later attempt of the same operation may succeed.
    ///
    /// Nothing is cached on these failures, so retrying re-runs the miss cleanly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. }
                | Error::Compute { .. }
                | Error::ModelAbort { .. }
                | Error::Fetch { .. }
                | Error::Transport(_)
                | Error::Io(_)
        )
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Backend { context, .. } | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        let mut context = ErrorContext::new().with_source("redis");
        if let Some(code) = e.code() {
            context = context.with_details(code.to_string());
        }
        Error::backend(e.to_string(), context)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::configuration(e.to_string(), ErrorContext::new().with_source("yaml"))
    }
}
