use crate::metrics::{MetricsCollector, RequestMetrics};
use crate::session::Session;
use chrono::Utc;
use orders_core::{
    ChallengeMethod, Comment, ConfigError, CoreError, ErrorExt, ErrorKind, InstagramApiError,
};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

const APP_ID: &str = "567067343352427";
const CAPABILITIES: &str = "3brTvw==";
const ACCEPT_LANGUAGE: &str = "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7";
const DEFAULT_RETRY_AFTER: u64 = 60;

/// Decoded body plus the headers some endpoints use to hand out tokens.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub pk: Option<Value>,
    #[serde(default)]
    pub username: Option<String>,
}

/// One entry of the `comments` array, as loose as the API sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawComment {
    #[serde(default)]
    pub pk: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

impl RawComment {
    /// Entries without an id are unusable and yield `None`.
    pub fn into_comment(self) -> Option<Comment> {
        let id = self
            .pk
            .as_ref()
            .and_then(id_string)
            .or_else(|| self.id.as_ref().and_then(id_string))?;
        let user_pk = self
            .user
            .as_ref()
            .and_then(|user| user.pk.as_ref())
            .and_then(id_string);
        let user_id = self
            .user_id
            .as_ref()
            .and_then(id_string)
            .or(user_pk)
            .unwrap_or_default();
        let username = self
            .user
            .and_then(|user| user.username)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "<unk>".to_string());

        Some(Comment {
            id,
            user_id,
            username,
            text: self.text.unwrap_or_default(),
            created_at: self.created_at.as_ref().and_then(timestamp).unwrap_or(0),
        })
    }
}

/// Parsed `get_comment` page.
#[derive(Debug, Clone)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    /// Entries in the response, including ones that could not be parsed.
    pub raw_size: usize,
}

/// Account identity returned by login and session verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub user_id: String,
    pub username: String,
}

/// Maps a failed response onto the error taxonomy.
///
/// The body is consulted before the status because the API reports 2FA and
/// checkpoint requirements as plain 400s.
pub fn classify_failure(
    status: StatusCode,
    body: &Value,
    retry_after: Option<u64>,
) -> InstagramApiError {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let error_type = body
        .get("error_type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || message.contains("wait a few minutes") {
        return InstagramApiError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        };
    }

    if body.get("two_factor_required").and_then(Value::as_bool) == Some(true) {
        let info = body.get("two_factor_info").cloned().unwrap_or(Value::Null);
        let identifier = info
            .get("two_factor_identifier")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let method = if info.get("totp_two_factor_on").and_then(Value::as_bool) == Some(true) {
            ChallengeMethod::AuthenticatorApp
        } else if info.get("sms_two_factor_on").and_then(Value::as_bool) == Some(true) {
            ChallengeMethod::Sms
        } else {
            ChallengeMethod::Unknown
        };
        return InstagramApiError::TwoFactorRequired { identifier, method };
    }

    if message == "challenge_required" || body.get("challenge").is_some() {
        let api_path = body
            .pointer("/challenge/api_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return InstagramApiError::ChallengeRequired { api_path };
    }

    if message == "login_required"
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        return InstagramApiError::LoginRequired;
    }

    if matches!(
        error_type,
        "bad_password" | "invalid_user" | "invalid_credentials"
    ) {
        return InstagramApiError::AuthenticationFailed {
            reason: error_type.to_string(),
        };
    }

    if status.is_server_error() {
        return InstagramApiError::ServerError {
            status_code: status.as_u16(),
        };
    }

    InstagramApiError::InvalidResponse {
        details: if message.is_empty() {
            format!("Unexpected status {}", status)
        } else {
            format!("{} ({})", message, status)
        },
    }
}

#[derive(Debug)]
pub struct InstagramApiClient {
    http_client: Client,
    base_url: Url,
    metrics: Arc<MetricsCollector>,
}

impl InstagramApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CoreError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| ConfigError::InvalidValue {
            field: "api.base_url".to_string(),
            value: format!("{} ({})", base_url, e),
        })?;

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Issues one request with the emulated app headers and records its
    /// outcome. `label` names the endpoint in metrics without embedded ids.
    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        label: &str,
        session: &Session,
        query_params: Option<&[(&str, String)]>,
        form: Option<&[(&str, String)]>,
    ) -> Result<ApiResponse, CoreError> {
        let start_time = Instant::now();
        let result = self
            .execute(method.clone(), endpoint, session, query_params, form)
            .await;

        let api_error = match &result {
            Err(CoreError::InstagramApi(api)) => Some(api),
            _ => None,
        };
        let request_metrics = RequestMetrics {
            endpoint: label.to_string(),
            method: method.to_string(),
            status_code: result.as_ref().ok().map(|response| response.status),
            response_time: start_time.elapsed(),
            success: result.is_ok(),
            rate_limited: matches!(
                api_error,
                Some(InstagramApiError::RateLimitExceeded { .. })
            ),
            auth_rejected: api_error.map(|api| api.kind() == ErrorKind::Auth) == Some(true),
            error_type: match &result {
                Ok(_) => None,
                Err(CoreError::InstagramApi(api)) => Some(api.error_code()),
                Err(other) => Some(other.error_code()),
            },
        };
        self.metrics.record_request(request_metrics).await;

        result
    }

    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        session: &Session,
        query_params: Option<&[(&str, String)]>,
        form: Option<&[(&str, String)]>,
    ) -> Result<ApiResponse, CoreError> {
        let url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| CoreError::Internal {
                message: format!("Invalid endpoint {}: {}", endpoint, e),
            })?;

        let mut request_builder = self
            .http_client
            .request(method.clone(), url)
            .header("User-Agent", session.user_agent())
            .header("X-IG-App-ID", APP_ID)
            .header("X-IG-Capabilities", CAPABILITIES)
            .header("X-IG-Connection-Type", "WIFI")
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .header("X-IG-Device-ID", &session.ids.uuid)
            .header("X-IG-Android-ID", &session.ids.android_device_id)
            .header("X-Pigeon-Session-Id", &session.ids.client_session_id);

        if let Some(authorization) = &session.authorization {
            request_builder = request_builder.header("Authorization", authorization);
        }
        if let Some(mid) = &session.mid {
            request_builder = request_builder.header("X-MID", mid);
        }
        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Instagram API request: {} {}", method, endpoint);
        let response = request_builder.send().await.map_err(|e| {
            error!("Network error for {} {}: {}", method, endpoint, e);
            if e.is_timeout() {
                CoreError::InstagramApi(InstagramApiError::RequestTimeout)
            } else {
                CoreError::Network(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let retry_after = headers
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::InstagramApi(InstagramApiError::RequestTimeout)
            } else {
                CoreError::Network(e)
            }
        })?;
        let body: Option<Value> = serde_json::from_str(&text).ok();
        let body_failed = body
            .as_ref()
            .and_then(|value| value.get("status"))
            .and_then(Value::as_str)
            == Some("fail");

        if !status.is_success() || body_failed {
            let api_error = classify_failure(status, body.as_ref().unwrap_or(&Value::Null), retry_after);
            warn!(
                "Request {} {} failed with status {}: {}",
                method, endpoint, status, api_error
            );
            return Err(api_error.into());
        }

        let body = body.ok_or_else(|| InstagramApiError::InvalidResponse {
            details: format!("{} returned a non-JSON body", endpoint),
        })?;

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn device_fields(session: &Session) -> Value {
        json!({
            "phone_id": session.ids.phone_id,
            "guid": session.ids.uuid,
            "device_id": session.ids.android_device_id,
            "adid": session.ids.advertising_id,
        })
    }

    fn signed_body(payload: &Value) -> Vec<(&'static str, String)> {
        vec![("signed_body", format!("SIGNATURE.{}", payload))]
    }

    fn merge(base: Value, extra: Value) -> Value {
        match (base, extra) {
            (Value::Object(mut base), Value::Object(extra)) => {
                base.extend(extra);
                Value::Object(base)
            }
            (base, _) => base,
        }
    }

    /// Copies the tokens handed out by a successful login onto `session`.
    fn apply_login(session: &mut Session, response: &ApiResponse) -> Result<AccountInfo, CoreError> {
        let authorization = response.header("ig-set-authorization").filter(|value| {
            // An empty bearer means the server declined to issue a token.
            !value.is_empty() && !value.ends_with(':')
        });
        if authorization.is_none() {
            return Err(InstagramApiError::InvalidResponse {
                details: "Login response carried no authorization token".to_string(),
            }
            .into());
        }
        session.authorization = authorization;
        if let Some(mid) = response.header("ig-set-x-mid") {
            session.mid = Some(mid);
        }

        let account = Self::parse_account(&response.body["logged_in_user"])?;
        session.user_id = Some(account.user_id.clone());
        session.mark_validated();
        Ok(account)
    }

    fn parse_account(user: &Value) -> Result<AccountInfo, CoreError> {
        let user_id = user.get("pk").and_then(id_string);
        let username = user.get("username").and_then(Value::as_str);
        match (user_id, username) {
            (Some(user_id), Some(username)) => Ok(AccountInfo {
                user_id,
                username: username.to_string(),
            }),
            _ => Err(InstagramApiError::InvalidResponse {
                details: "Missing user pk or username".to_string(),
            }
            .into()),
        }
    }

    /// Password login. 2FA and checkpoint demands surface as
    /// [`InstagramApiError::TwoFactorRequired`] and
    /// [`InstagramApiError::ChallengeRequired`].
    pub async fn login(
        &self,
        session: &mut Session,
        password: &str,
    ) -> Result<AccountInfo, CoreError> {
        let payload = Self::merge(
            Self::device_fields(session),
            json!({
                "username": session.username,
                "enc_password": format!("#PWD_INSTAGRAM:0:{}:{}", Utc::now().timestamp(), password),
                "google_tokens": "[]",
                "login_attempt_count": "0",
                "country_codes": "[{\"country_code\":\"886\",\"source\":[\"default\"]}]",
            }),
        );

        info!("Logging in as {}", session.username);
        let response = self
            .make_request(
                Method::POST,
                "accounts/login/",
                "login",
                session,
                None,
                Some(&Self::signed_body(&payload)),
            )
            .await?;
        Self::apply_login(session, &response)
    }

    pub async fn two_factor_login(
        &self,
        session: &mut Session,
        identifier: &str,
        method: ChallengeMethod,
        code: &str,
    ) -> Result<AccountInfo, CoreError> {
        let verification_method = match method {
            ChallengeMethod::AuthenticatorApp => "3",
            _ => "1",
        };
        let payload = Self::merge(
            Self::device_fields(session),
            json!({
                "username": session.username,
                "verification_code": code,
                "two_factor_identifier": identifier,
                "verification_method": verification_method,
                "trust_this_device": "0",
            }),
        );

        info!("Submitting two-factor code for {}", session.username);
        let response = self
            .make_request(
                Method::POST,
                "accounts/two_factor_login/",
                "two_factor_login",
                session,
                None,
                Some(&Self::signed_body(&payload)),
            )
            .await?;
        Self::apply_login(session, &response)
    }

    /// Asks the checkpoint to send a code by email.
    pub async fn challenge_request_code(
        &self,
        session: &Session,
        api_path: &str,
    ) -> Result<(), CoreError> {
        let form = [("choice", "1".to_string())];
        self.make_request(
            Method::POST,
            api_path,
            "challenge",
            session,
            None,
            Some(&form),
        )
        .await?;
        Ok(())
    }

    pub async fn challenge_submit_code(
        &self,
        session: &mut Session,
        api_path: &str,
        code: &str,
    ) -> Result<AccountInfo, CoreError> {
        let form = [("security_code", code.to_string())];
        let response = self
            .make_request(
                Method::POST,
                api_path,
                "challenge",
                session,
                None,
                Some(&form),
            )
            .await?;
        Self::apply_login(session, &response)
    }

    /// Verifies that `session` is still accepted.
    pub async fn current_user(&self, session: &Session) -> Result<AccountInfo, CoreError> {
        let query = [("edit", "true".to_string())];
        let response = self
            .make_request(
                Method::GET,
                "accounts/current_user/",
                "current_user",
                session,
                Some(&query),
                None,
            )
            .await?;
        Self::parse_account(&response.body["user"])
    }

    pub async fn user_id_from_username(
        &self,
        session: &Session,
        username: &str,
    ) -> Result<String, CoreError> {
        let response = self
            .make_request(
                Method::GET,
                &format!("users/{}/usernameinfo/", username),
                "usernameinfo",
                session,
                None,
                None,
            )
            .await?;
        response
            .body
            .pointer("/user/pk")
            .and_then(id_string)
            .ok_or_else(|| {
                InstagramApiError::InvalidResponse {
                    details: format!("No user pk for {}", username),
                }
                .into()
            })
    }

    /// Id of the broadcast `user_id` is currently hosting.
    pub async fn live_broadcast_id(
        &self,
        session: &Session,
        user_id: &str,
        username: &str,
    ) -> Result<String, CoreError> {
        let response = self
            .make_request(
                Method::GET,
                &format!("live/{}/info/", user_id),
                "live_info",
                session,
                None,
                None,
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(CoreError::InstagramApi(InstagramApiError::InvalidResponse { .. })) => {
                return Err(InstagramApiError::BroadcastNotFound {
                    username: username.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e),
        };

        response
            .body
            .get("broadcast_id")
            .or_else(|| response.body.pointer("/broadcast/broadcast_id"))
            .or_else(|| response.body.pointer("/broadcast/id"))
            .and_then(id_string)
            .ok_or_else(|| {
                InstagramApiError::BroadcastNotFound {
                    username: username.to_string(),
                }
                .into()
            })
    }

    /// Comments on `broadcast_id` newer than `last_comment_ts`.
    pub async fn get_live_comments(
        &self,
        session: &Session,
        broadcast_id: &str,
        last_comment_ts: i64,
    ) -> Result<CommentPage, CoreError> {
        let query = [("last_comment_ts", last_comment_ts.to_string())];
        let response = self
            .make_request(
                Method::GET,
                &format!("live/{}/get_comment/", broadcast_id),
                "live_comments",
                session,
                Some(&query),
                None,
            )
            .await?;

        let entries = match response.body.get("comments") {
            Some(Value::Array(entries)) => entries.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(InstagramApiError::InvalidResponse {
                    details: "comments is not an array".to_string(),
                }
                .into())
            }
        };

        let raw_size = entries.len();
        let comments: Vec<Comment> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<RawComment>(entry).ok())
            .filter_map(RawComment::into_comment)
            .collect();

        if comments.len() < raw_size {
            debug!(
                "Dropped {} unparseable comment entries",
                raw_size - comments.len()
            );
        }

        Ok(CommentPage { comments, raw_size })
    }
}
