use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication network error: {0}")]
    AuthNetwork(String),

    #[error("Account credentials rejected: {0}")]
    AuthInvalid(String),

    #[error("All accounts are cooling down, quota resets at {reset_hint}")]
    ResourceExhausted { reset_hint: String },

    #[error("No accounts configured")]
    NoAccounts,

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Error-kind tag surfaced to clients in the Anthropic error envelope.
    pub fn client_kind(&self) -> &'static str {
        match self {
            GatewayError::ResourceExhausted { .. } => "rate_limit_error",
            GatewayError::AuthInvalid(_) => "authentication_error",
            GatewayError::InvalidRequest(_) | GatewayError::Translation(_) => {
                "invalid_request_error"
            }
            GatewayError::NoAccounts | GatewayError::AuthNetwork(_) => "overloaded_error",
            GatewayError::Upstream { status, .. } => match status {
                400 => "invalid_request_error",
                401 => "authentication_error",
                403 => "permission_error",
                429 => "rate_limit_error",
                _ => "api_error",
            },
            _ => "api_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::ResourceExhausted { .. } => 429,
            GatewayError::AuthInvalid(_) => 401,
            GatewayError::InvalidRequest(_) | GatewayError::Translation(_) => 400,
            GatewayError::NoAccounts | GatewayError::AuthNetwork(_) => 503,
            GatewayError::Upstream { status, .. } => *status,
            _ => 500,
        }
    }
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
