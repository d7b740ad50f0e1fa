use crate::auth::redact_token;
use crate::config::ApiConfig;
use crate::error::{parse_reply, ApiError, ApiResult};
use crate::identifiers::{validate_signup, Identifier, Otp};
use crate::models::*;
use crate::session::SessionStore;
use anyhow::anyhow;
use log::{debug, info, warn};
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ApiMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FromStr for ApiMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(ApiMethod::Get),
            "post" => Ok(ApiMethod::Post),
            "put" => Ok(ApiMethod::Put),
            "patch" => Ok(ApiMethod::Patch),
            "delete" => Ok(ApiMethod::Delete),
            _ => Err(anyhow!("unknown method: {}", s)),
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
            ApiMethod::Put => "PUT",
            ApiMethod::Patch => "PATCH",
            ApiMethod::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

impl From<ApiMethod> for reqwest::Method {
    fn from(m: ApiMethod) -> Self {
        match m {
            ApiMethod::Get => reqwest::Method::GET,
            ApiMethod::Post => reqwest::Method::POST,
            ApiMethod::Put => reqwest::Method::PUT,
            ApiMethod::Patch => reqwest::Method::PATCH,
            ApiMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One file in a multipart upload. Owned bytes, so the request can be rebuilt for a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FilePart>),
}

/// Everything needed to (re-)issue a call.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub method: ApiMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    retried: bool,
}

impl PendingRequest {
    pub fn new(method: ApiMethod, path: &str, body: RequestBody) -> Self {
        PendingRequest {
            method,
            path: path.to_string(),
            query: vec![],
            body,
            retried: false,
        }
    }

    pub fn with_query(mut self, params: HashMap<String, String>) -> Self {
        let mut params: Vec<(String, String)> = params.into_iter().collect();
        params.sort();
        self.query = params;
        self
    }

    pub fn retried(&self) -> bool {
        self.retried
    }
}

struct RawReply {
    status: u16,
    body: Vec<u8>,
}

fn json_body<T: Serialize>(val: &T) -> ApiResult<RequestBody> {
    let val = serde_json::to_value(val)
        .map_err(|e| ApiError::validation(&format!("could not encode request body: {e}")))?;
    Ok(RequestBody::Json(val))
}

fn take_data<T: DeserializeOwned>(env: ApiResponse<Value>) -> ApiResult<T> {
    let data = env.data.ok_or(ApiError::Server {
        status: 200,
        message: "response is missing data".to_string(),
    })?;
    serde_json::from_value(data).map_err(|e| ApiError::Server {
        status: 200,
        message: format!("unexpected response data: {e}"),
    })
}

/// Client for the ReVeda backend.
///
/// Attaches the stored access token to every call. When a call comes back 401 it refreshes the
/// token pair once and replays the call once; if the refresh itself fails the session is wiped
/// and the caller gets [`ApiError::Unauthenticated`]. Nothing else is retried.
///
/// Build one at startup and share it (`&ApiClient` or `Arc<ApiClient>`); it is `Send + Sync`.
pub struct ApiClient {
    http_client: reqwest::blocking::Client,
    config: ApiConfig,
    session: Arc<SessionStore>,
    // only one refresh in flight; others wait and reuse its result
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, session: Arc<SessionStore>) -> anyhow::Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        info!("API client configured for {}", config.base_url);

        Ok(ApiClient {
            http_client,
            config,
            session,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn auth_headers(&self, access_token: Option<&str>) -> ApiResult<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = access_token {
            let mut auth_value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Storage(anyhow!("stored access token is not header-safe")))?;
            auth_value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth_value);
        };
        Ok(headers)
    }

    fn send(&self, req: &PendingRequest, access_token: Option<&str>) -> ApiResult<RawReply> {
        debug!(
            "API {} {} retried={} auth={}",
            req.method,
            req.path,
            req.retried,
            access_token.map(redact_token).unwrap_or_else(|| "none".to_string())
        );
        let mut builder = self
            .http_client
            .request(req.method.into(), self.config.url(&req.path))
            .headers(self.auth_headers(access_token)?)
            .query(&req.query);
        builder = match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(val) => builder.json(val),
            RequestBody::Multipart(files) => {
                let mut form = reqwest::blocking::multipart::Form::new();
                for f in files {
                    let part = reqwest::blocking::multipart::Part::bytes(f.bytes.clone())
                        .file_name(f.file_name.clone())
                        .mime_str(&f.mime)
                        .map_err(|_| {
                            ApiError::invalid_field(&f.field, &format!("bad MIME type: {}", f.mime))
                        })?;
                    form = form.part(f.field.clone(), part);
                }
                builder.multipart(form)
            }
        };
        let res = builder.send().map_err(ApiError::Network)?;
        let status = res.status().as_u16();
        let body = res.bytes().map_err(ApiError::Network)?.to_vec();
        debug!("API {} {} -> {}", req.method, req.path, status);
        Ok(RawReply { status, body })
    }

    /// Issues a call, with the single refresh-and-replay on 401.
    pub fn execute(&self, mut req: PendingRequest) -> ApiResult<ApiResponse<Value>> {
        let mut token = self.session.access_token();
        loop {
            let reply = self.send(&req, token.as_deref())?;
            if reply.status != 401 || req.retried {
                return parse_reply(reply.status, &reply.body);
            }
            req.retried = true;
            token = Some(self.refresh_after_unauthorized(token.as_deref())?);
            debug!("replaying {} {} with refreshed token", req.method, req.path);
        }
    }

    pub fn request(
        &self,
        method: ApiMethod,
        path: &str,
        body: Option<Value>,
    ) -> ApiResult<ApiResponse<Value>> {
        let body = body.map(RequestBody::Json).unwrap_or(RequestBody::Empty);
        self.execute(PendingRequest::new(method, path, body))
    }

    fn get(&self, path: &str) -> ApiResult<ApiResponse<Value>> {
        self.execute(PendingRequest::new(ApiMethod::Get, path, RequestBody::Empty))
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> ApiResult<ApiResponse<Value>> {
        self.execute(PendingRequest::new(ApiMethod::Post, path, json_body(body)?))
    }

    /// Called after a 401 for a request sent with `stale` (or no token at all). Returns the
    /// access token to replay with.
    fn refresh_after_unauthorized(&self, stale: Option<&str>) -> ApiResult<String> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // someone else refreshed (or logged in) while this request was in flight
        if let Some(current) = self.session.access_token() {
            if Some(current.as_str()) != stale {
                debug!("access token already replaced, skipping refresh");
                return Ok(current);
            }
        }

        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(ApiError::Unauthenticated("no refresh token stored".to_string()))?;

        match self.refresh_tokens(&refresh_token) {
            Ok(tokens) => {
                self.session
                    .replace_tokens(&tokens)
                    .map_err(ApiError::Storage)?;
                info!("access token refreshed");
                Ok(tokens.accessToken)
            }
            Err(err) => {
                warn!("token refresh failed, clearing session: {}", err);
                self.clear_session();
                Err(ApiError::Unauthenticated(format!("session expired ({err})")))
            }
        }
    }

    /// Trades a refresh token for a new pair. Never goes through the 401 path itself.
    fn refresh_tokens(&self, refresh_token: &str) -> ApiResult<AuthTokens> {
        let req = PendingRequest::new(
            ApiMethod::Post,
            "/auth/refresh-token",
            json_body(&RefreshTokenData {
                refreshToken: refresh_token.to_string(),
            })?,
        );
        let reply = self.send(&req, None)?;
        let env = parse_reply(reply.status, &reply.body)?;
        let payload: RefreshPayload = take_data(env)?;
        Ok(payload.tokens)
    }

    fn clear_session(&self) {
        if let Err(e) = self.session.clear() {
            warn!("failed to clear persisted session: {:#}", e);
        }
    }

    /// Registers a new account; the backend sends an OTP to finish signing in.
    pub fn signup(&self, data: &SignupData) -> ApiResult<ApiResponse<Value>> {
        validate_signup(data)?;
        let data = SignupData {
            firstName: data.firstName.trim().to_string(),
            lastName: data.lastName.trim().to_string(),
            email: data.email.trim().to_string(),
            phoneNumber: data.phoneNumber.trim().to_string(),
        };
        self.post("/auth/signup", &data)
    }

    /// Asks the backend to send an OTP. Does not establish a session.
    pub fn login(&self, identifier: &str) -> ApiResult<LoginOutcome> {
        let identifier = Identifier::from_str(identifier)?;
        let env = self.post(
            "/auth/login",
            &LoginData {
                identifier: identifier.to_string(),
            },
        )?;
        let otp_sent = env
            .data
            .as_ref()
            .and_then(|d| d.get("otpSent"))
            .and_then(Value::as_bool)
            .unwrap_or(env.success);
        Ok(LoginOutcome { otpSent: otp_sent })
    }

    pub fn resend_otp(&self, identifier: &str) -> ApiResult<ApiResponse<Value>> {
        let identifier = Identifier::from_str(identifier)?;
        self.post(
            "/auth/resend-otp",
            &ResendOtpData {
                identifier: identifier.to_string(),
            },
        )
    }

    /// Exchanges an OTP for a session, persisting tokens and user record together.
    pub fn verify_otp(&self, identifier: &str, code: &str) -> ApiResult<Session> {
        let identifier = Identifier::from_str(identifier)?;
        let otp = Otp::from_str(code)?;
        let env = self.post(
            "/auth/verify-otp",
            &VerifyOtpData {
                identifier: identifier.to_string(),
                otp: otp.to_string(),
            },
        )?;
        self.establish(env)
    }

    pub fn login_with_google(&self, id_token: &str) -> ApiResult<Session> {
        if id_token.trim().is_empty() {
            return Err(ApiError::invalid_field("idToken", "Google ID token is required"));
        }
        let env = self.post(
            "/auth/google-login",
            &GoogleLoginData {
                idToken: id_token.trim().to_string(),
            },
        )?;
        self.establish(env)
    }

    fn establish(&self, env: ApiResponse<Value>) -> ApiResult<Session> {
        let payload: AuthPayload = take_data(env)?;
        let session = self
            .session
            .establish(&payload.tokens, &payload.user)
            .map_err(ApiError::Storage)?;
        info!("signed in as {}", session.user.email);
        Ok(session)
    }

    /// Best-effort: storage failures are logged, never returned.
    pub fn logout(&self) {
        self.clear_session();
        info!("signed out");
    }

    /// Local check only; the token may well be expired server-side.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Cached user record, no network.
    pub fn current_user(&self) -> Option<UserRecord> {
        self.session.current_user()
    }

    /// Fetches the profile from the backend. Does not touch the cached record.
    pub fn get_profile(&self) -> ApiResult<UserRecord> {
        let payload: ProfilePayload = take_data(self.get("/auth/profile")?)?;
        Ok(payload.user)
    }

    /// Uploads a new profile picture (multipart field `image`) and caches the updated user.
    pub fn upload_profile_picture(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> ApiResult<ProfilePicturePayload> {
        if bytes.is_empty() {
            return Err(ApiError::invalid_field("image", "Image file is empty"));
        }
        if !mime.starts_with("image/") {
            return Err(ApiError::invalid_field(
                "image",
                &format!("Not an image: {mime}"),
            ));
        }
        let body = RequestBody::Multipart(vec![FilePart {
            field: "image".to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes,
        }]);
        let env = self.execute(PendingRequest::new(
            ApiMethod::Post,
            "/auth/profile-image",
            body,
        ))?;
        let payload: ProfilePicturePayload = take_data(env)?;
        if let Err(e) = self.session.replace_user(&payload.user) {
            if !self.session.is_authenticated() {
                return Err(ApiError::Unauthenticated(
                    "signed out while the upload was in flight".to_string(),
                ));
            }
            return Err(ApiError::Storage(e));
        }
        Ok(payload)
    }

    pub fn get_doctors(&self) -> ApiResult<Vec<Doctor>> {
        take_data(self.get("/doctors")?)
    }

    pub fn health_check(&self) -> ApiResult<ApiResponse<Value>> {
        self.get("/health")
    }

    pub fn image_url(&self, path: &str) -> Option<String> {
        self.config.image_url(path)
    }
}

#[test]
fn test_method() {
    assert_eq!(ApiMethod::from_str("get").unwrap(), ApiMethod::Get);
    assert_eq!(ApiMethod::from_str("POST").unwrap(), ApiMethod::Post);
    assert!(ApiMethod::from_str("fetch").is_err());
    assert_eq!(ApiMethod::Delete.to_string(), "DELETE");
    assert_eq!(reqwest::Method::from(ApiMethod::Patch), reqwest::Method::PATCH);
}

#[test]
fn test_validation_happens_before_network() {
    // nothing listens on port 9; a network attempt would surface as a network error instead
    let client = ApiClient::new(
        ApiConfig::new("http://127.0.0.1:9"),
        Arc::new(SessionStore::in_memory()),
    )
    .unwrap();
    match client.login("not an identifier") {
        Err(ApiError::Validation { errors, .. }) => assert_eq!(errors[0].field, "identifier"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
    match client.verify_otp("user@example.com", "12345") {
        Err(ApiError::Validation { errors, .. }) => assert_eq!(errors[0].field, "otp"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        client.login_with_google("  "),
        Err(ApiError::Validation { .. })
    ));
    assert!(matches!(
        client.upload_profile_picture("notes.txt", "text/plain", b"hi".to_vec()),
        Err(ApiError::Validation { .. })
    ));
}

#[test]
fn test_unreachable_backend_is_network_error() {
    let client = ApiClient::new(
        ApiConfig::new("http://127.0.0.1:9").with_timeout(std::time::Duration::from_secs(2)),
        Arc::new(SessionStore::in_memory()),
    )
    .unwrap();
    let err = client.health_check().unwrap_err();
    assert!(err.is_network(), "got: {:?}", err);
    // never treated as an auth failure
    assert!(!err.is_unauthenticated());
}
