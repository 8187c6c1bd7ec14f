use thiserror::Error;

/// Unified error type for the cascadeflow gateway.
#[derive(Error, Debug)]
pub enum CascadeError {
    // ── Request errors ─────────────────────────────────────────
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Routing / upstream errors ──────────────────────────────
    #[error("routing error: {0}")]
    Routing(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error ({status_code}): {message}")]
    Upstream {
        status_code: u16,
        message: String,
        /// Parsed upstream body, preserved for diagnostics.
        payload: Option<serde_json::Value>,
    },

    #[error("provider error: {0}")]
    Provider(String),

    // ── Budget / billing errors ────────────────────────────────
    #[error("budget exceeded: {resource}: used {used:.6}, limit {limit:.6}")]
    BudgetExceeded {
        resource: String,
        used: f64,
        limit: f64,
    },

    #[error("billing api error ({status_code:?}): {message}")]
    BillingApi {
        status_code: Option<u16>,
        message: String,
    },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CascadeError {
    /// The upstream HTTP status attached to this error, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            CascadeError::Upstream { status_code, .. } => Some(*status_code),
            CascadeError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
