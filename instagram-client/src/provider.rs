//! Session acquisition: reuse a persisted login when the server still accepts
//! it, otherwise authenticate with credentials, answering 2FA and checkpoint
//! prompts through a [`ChallengePrompt`].

use crate::api::{AccountInfo, InstagramApiClient};
use crate::challenge::{ChallengePrompt, ChallengeResponse};
use crate::session::Session;
use async_trait::async_trait;
use orders_core::{
    ChallengeMethod, CoreError, Credentials, ErrorExt, ErrorKind, InstagramApiError,
    SessionProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct InstagramSessionProvider {
    api: Arc<InstagramApiClient>,
    credentials: Credentials,
    session_path: PathBuf,
    prompt: Arc<dyn ChallengePrompt>,
}

impl InstagramSessionProvider {
    pub fn new(
        api: Arc<InstagramApiClient>,
        credentials: Credentials,
        session_path: impl Into<PathBuf>,
        prompt: Arc<dyn ChallengePrompt>,
    ) -> Self {
        Self {
            api,
            credentials,
            session_path: session_path.into(),
            prompt,
        }
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    fn discard_persisted(&self) {
        if let Err(e) = Session::remove(&self.session_path) {
            warn!(
                "Failed to delete session file {}: {}",
                self.session_path.display(),
                e
            );
        }
    }

    fn persist(&self, session: &Session) {
        match session.save(&self.session_path) {
            Ok(()) => debug!("Session saved to {}", self.session_path.display()),
            Err(e) => warn!(
                "Failed to save session to {}: {}",
                self.session_path.display(),
                e
            ),
        }
    }

    /// Persisted session that the server still accepts, if any. Rejected or
    /// unreadable sessions are deleted.
    async fn resume(&self) -> Result<Option<Session>, CoreError> {
        if !self.session_path.exists() {
            return Ok(None);
        }

        let mut session = match Session::load(&self.session_path) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring unreadable session file: {}", e);
                self.discard_persisted();
                return Ok(None);
            }
        };

        if session.username != self.credentials.username || !session.is_authenticated() {
            info!("Persisted session does not belong to the configured account");
            self.discard_persisted();
            return Ok(None);
        }

        match self.api.current_user(&session).await {
            Ok(account) => {
                info!("Reusing persisted session for {}", account.username);
                session.user_id = Some(account.user_id);
                session.mark_validated();
                self.persist(&session);
                Ok(Some(session))
            }
            Err(e) if e.kind() == ErrorKind::Auth => {
                warn!("Persisted session rejected: {}", e);
                self.discard_persisted();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn login(&self) -> Result<Session, CoreError> {
        let mut session = Session::new(&self.credentials.username);
        debug!("Logging in with device {}", session.user_agent());

        let result = self
            .api
            .login(&mut session, &self.credentials.password)
            .await;
        let account = match result {
            Ok(account) => account,
            Err(CoreError::InstagramApi(InstagramApiError::TwoFactorRequired {
                identifier,
                method,
            })) => {
                self.complete_two_factor(&mut session, &identifier, method)
                    .await?
            }
            Err(CoreError::InstagramApi(InstagramApiError::ChallengeRequired { api_path })) => {
                self.complete_challenge(&mut session, &api_path).await?
            }
            Err(e) => return Err(e),
        };

        info!("Logged in as {} ({})", account.username, account.user_id);
        Ok(session)
    }

    async fn complete_two_factor(
        &self,
        session: &mut Session,
        identifier: &str,
        method: ChallengeMethod,
    ) -> Result<AccountInfo, CoreError> {
        info!("Two-factor verification required ({:?})", method);
        let result = match self.ask(method).await? {
            ChallengeResponse::Code(code) => {
                validate_code(&code)?;
                self.api
                    .two_factor_login(session, identifier, method, &code)
                    .await
            }
            ChallengeResponse::AlreadyApproved => self.retry_login(session).await,
        };
        result.map_err(escalate)
    }

    async fn complete_challenge(
        &self,
        session: &mut Session,
        api_path: &str,
    ) -> Result<AccountInfo, CoreError> {
        info!("Checkpoint challenge required");
        self.api.challenge_request_code(session, api_path).await?;

        let result = match self.ask(ChallengeMethod::Email).await? {
            ChallengeResponse::Code(code) => {
                validate_code(&code)?;
                self.api
                    .challenge_submit_code(session, api_path, &code)
                    .await
            }
            ChallengeResponse::AlreadyApproved => self.retry_login(session).await,
        };
        result.map_err(escalate)
    }

    async fn retry_login(&self, session: &mut Session) -> Result<AccountInfo, CoreError> {
        info!("Retrying login after out-of-band approval");
        self.api.login(session, &self.credentials.password).await
    }

    /// Runs the prompt on the blocking pool. Dropping the returned future does
    /// not interrupt a terminal read that is already waiting; the binary bounds
    /// runtime shutdown so an abandoned prompt cannot hold the process open.
    async fn ask(&self, method: ChallengeMethod) -> Result<ChallengeResponse, CoreError> {
        let prompt = Arc::clone(&self.prompt);
        let username = self.credentials.username.clone();
        tokio::task::spawn_blocking(move || prompt.request_code(&username, method))
            .await
            .map_err(|e| CoreError::Internal {
                message: format!("Verification prompt failed: {}", e),
            })?
    }
}

fn validate_code(code: &str) -> Result<(), CoreError> {
    if code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(InstagramApiError::AuthenticationFailed {
            reason: "verification code must be alphanumeric".to_string(),
        }
        .into())
    }
}

/// A second verification demand after answering one is not retried.
fn escalate(error: CoreError) -> CoreError {
    match error {
        CoreError::InstagramApi(InstagramApiError::TwoFactorRequired { .. })
        | CoreError::InstagramApi(InstagramApiError::ChallengeRequired { .. }) => {
            InstagramApiError::AuthenticationFailed {
                reason: "verification was not accepted".to_string(),
            }
            .into()
        }
        other => other,
    }
}

#[async_trait]
impl SessionProvider for InstagramSessionProvider {
    type Session = Session;

    async fn acquire(&self, force_fresh: bool) -> Result<Session, CoreError> {
        if force_fresh {
            info!("Discarding persisted session and logging in again");
            self.discard_persisted();
        } else if let Some(session) = self.resume().await? {
            return Ok(session);
        }

        let session = self.login().await?;
        self.persist(&session);
        Ok(session)
    }
}
