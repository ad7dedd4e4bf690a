use dialoguer::Input;
use orders_core::{ChallengeMethod, CoreError};

/// Operator answer to a verification prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeResponse {
    Code(String),
    /// The login was approved on another device; retry without a code.
    AlreadyApproved,
}

/// Source of out-of-band verification codes.
pub trait ChallengePrompt: Send + Sync {
    fn request_code(
        &self,
        username: &str,
        method: ChallengeMethod,
    ) -> Result<ChallengeResponse, CoreError>;
}

/// Asks the operator on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn label(method: ChallengeMethod) -> &'static str {
        match method {
            ChallengeMethod::AuthenticatorApp => "6-digit code from your authenticator app",
            ChallengeMethod::Sms => "6-digit code sent by SMS",
            ChallengeMethod::Email => "6-digit code sent by email",
            ChallengeMethod::Unknown => "verification code",
        }
    }
}

impl ChallengePrompt for TerminalPrompt {
    fn request_code(
        &self,
        username: &str,
        method: ChallengeMethod,
    ) -> Result<ChallengeResponse, CoreError> {
        let code: String = Input::new()
            .with_prompt(format!(
                "{} for {} (leave empty if already approved)",
                Self::label(method),
                username
            ))
            .allow_empty(true)
            .interact_text()
            .map_err(|e| CoreError::Internal {
                message: format!("Failed to read verification code: {}", e),
            })?;

        Ok(parse_response(&code))
    }
}

/// Empty input means the operator approved the login elsewhere.
pub fn parse_response(input: &str) -> ChallengeResponse {
    let code = input.trim();
    if code.is_empty() {
        ChallengeResponse::AlreadyApproved
    } else {
        ChallengeResponse::Code(code.to_string())
    }
}
