use crate::error::*;
use std::fmt;
use tracing::{error, warn};

/// Failure classes the poll loop makes retry/stop decisions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Session rejected; recoverable by re-authentication up to a bound.
    Auth,
    /// Network, parse or rate-limit failure; retried after a short delay.
    Transient,
    /// Order destination unwritable; always fatal.
    Persist,
    /// Missing or invalid startup parameters; always fatal.
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Transient => "transient",
            ErrorKind::Persist => "persist",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn kind(&self) -> ErrorKind;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::InstagramApi(e) => {
                error!("Instagram API error details: {:?}", e);
            }
            CoreError::Store(e) => {
                error!("Order store error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InstagramApi(e) => e.kind(),
            CoreError::Store(e) => e.kind(),
            CoreError::Config(e) => e.kind(),
            CoreError::Network(_)
            | CoreError::Serialization(_)
            | CoreError::Receipt { .. } => ErrorKind::Transient,
            CoreError::Io(_) | CoreError::Internal { .. } => ErrorKind::Internal,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::InstagramApi(e) => e.user_friendly_message(),
            CoreError::Store(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::Receipt { message } => format!("Receipt could not be printed: {}", message),
            CoreError::Io(e) => format!("File system error: {}", e),
            _ => "An unexpected error occurred.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::InstagramApi(_) => "INSTAGRAM_API".to_string(),
            CoreError::Store(_) => "STORE".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::Receipt { .. } => "RECEIPT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for InstagramApiError {
    fn log_error(&self) -> &Self {
        error!("InstagramApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("InstagramApiError (warning): {}", self);
        self
    }

    fn kind(&self) -> ErrorKind {
        match self {
            InstagramApiError::AuthenticationFailed { .. }
            | InstagramApiError::LoginRequired
            | InstagramApiError::TwoFactorRequired { .. }
            | InstagramApiError::ChallengeRequired { .. }
            | InstagramApiError::ReauthLimitReached { .. } => ErrorKind::Auth,
            InstagramApiError::RateLimitExceeded { .. }
            | InstagramApiError::RequestTimeout
            | InstagramApiError::InvalidResponse { .. }
            | InstagramApiError::ServerError { .. } => ErrorKind::Transient,
            InstagramApiError::BroadcastNotFound { .. } => ErrorKind::Config,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            InstagramApiError::AuthenticationFailed { reason } => format!(
                "Instagram login failed ({}). Please check INSTAGRAM_USERNAME and INSTAGRAM_PASSWORD.",
                reason
            ),
            InstagramApiError::LoginRequired => {
                "Instagram session expired. Logging in again.".to_string()
            }
            InstagramApiError::TwoFactorRequired { .. }
            | InstagramApiError::ChallengeRequired { .. } => {
                "Instagram asked for a verification code.".to_string()
            }
            InstagramApiError::ReauthLimitReached { failures } => format!(
                "Login was rejected {} times in a row. Please resolve the Instagram verification manually.",
                failures
            ),
            InstagramApiError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Waiting {} seconds before trying again.",
                retry_after
            ),
            InstagramApiError::BroadcastNotFound { username } => format!(
                "{} is not live right now. Please start the broadcast first.",
                username
            ),
            InstagramApiError::RequestTimeout => {
                "Request to Instagram timed out. Retrying shortly.".to_string()
            }
            _ => "Instagram API error occurred. Retrying shortly.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            InstagramApiError::AuthenticationFailed { .. } => "IG_AUTH_FAILED".to_string(),
            InstagramApiError::LoginRequired => "IG_LOGIN_REQUIRED".to_string(),
            InstagramApiError::TwoFactorRequired { .. } => "IG_TWO_FACTOR_REQUIRED".to_string(),
            InstagramApiError::ChallengeRequired { .. } => "IG_CHALLENGE_REQUIRED".to_string(),
            InstagramApiError::ReauthLimitReached { .. } => "IG_REAUTH_LIMIT".to_string(),
            InstagramApiError::RateLimitExceeded { .. } => "IG_RATE_LIMIT".to_string(),
            InstagramApiError::BroadcastNotFound { .. } => "IG_BROADCAST_NOT_FOUND".to_string(),
            InstagramApiError::RequestTimeout => "IG_TIMEOUT".to_string(),
            InstagramApiError::InvalidResponse { .. } => "IG_INVALID_RESPONSE".to_string(),
            InstagramApiError::ServerError { .. } => "IG_SERVER_ERROR".to_string(),
        }
    }
}

impl ErrorExt for StoreError {
    fn log_error(&self) -> &Self {
        error!("StoreError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("StoreError (warning): {}", self);
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Persist
    }

    fn user_friendly_message(&self) -> String {
        match self {
            StoreError::CreateFailed { path, .. } => format!(
                "Could not create order file {}. Check the directory permissions and free space.",
                path
            ),
            StoreError::WriteFailed { path, .. } => format!(
                "Could not write to order file {}. Check the directory permissions and free space.",
                path
            ),
        }
    }

    fn error_code(&self) -> String {
        match self {
            StoreError::CreateFailed { .. } => "STORE_CREATE_FAILED".to_string(),
            StoreError::WriteFailed { .. } => "STORE_WRITE_FAILED".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => format!("Settings file {} not found.", path),
            ConfigError::MissingField { field } => {
                format!("Required configuration field '{}' is missing.", field)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::MissingEnvironmentVariable { var_name } => format!(
                "Environment variable '{}' is required but not set. Add it to your .env file.",
                var_name
            ),
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration is inconsistent: {}", reason)
            }
            ConfigError::Parse(_) => {
                "Settings file format is invalid. Please check the TOML syntax.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

/// Formats fatal errors for the operator's terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn new() -> Self {
        Self
    }

    /// Terminal message shown to the operator before a non-zero exit.
    pub fn fatal_message(&self, error: &CoreError) -> String {
        format!(
            "[{}] {} ({})",
            error.error_code(),
            error.user_friendly_message(),
            error
        )
    }
}
