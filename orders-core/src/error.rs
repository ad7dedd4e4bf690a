use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Instagram API error: {0}")]
    InstagramApi(#[from] InstagramApiError),

    #[error("Order store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Receipt printing failed: {message}")]
    Receipt { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum InstagramApiError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Login required")]
    LoginRequired,

    #[error("Two-factor authentication required")]
    TwoFactorRequired {
        identifier: String,
        method: ChallengeMethod,
    },

    #[error("Checkpoint challenge required")]
    ChallengeRequired { api_path: String },

    #[error("Session rejected {failures} times in a row, consult operator")]
    ReauthLimitReached { failures: u32 },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("No live broadcast for {username}")]
    BroadcastNotFound { username: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },
}

/// Delivery channel for an out-of-band login code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    AuthenticatorApp,
    Sms,
    Email,
    Unknown,
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Cannot create order file {path}: {reason}")]
    CreateFailed { path: String, reason: String },

    #[error("Cannot write order file {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
