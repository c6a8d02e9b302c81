use crate::backup::cloud::{CloudDrive, RemoteFile};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::settings::{SettingsExt, SettingsKey, SettingsStore};
use bon::Builder;
use chrono::Utc;
use function_name::named;
use getset::Getters;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use validator::Validate;

static PROVIDER: &str = "Google Drive";
static AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
static TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
static REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
static FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
static UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
static DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
static FILE_FIELDS: &str = "id,name,createdTime,size";
static ZIP_MIME: &str = "application/zip";
static PAGE_SIZE: &str = "100";
/// Tokens this close to expiry count as expired.
static EXPIRY_MARGIN_MS: i64 = 30_000;
static DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client registered for the application.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct GoogleOAuthConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    client_id: String,
    #[builder(into)]
    client_secret: RedactedString,
    #[validate(url)]
    #[builder(into)]
    redirect_uri: String,
}

/// Tokens as persisted under `googleTokens`.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix epoch milliseconds.
    pub expiry_date: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl GoogleTokens {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expiry_date
            .is_some_and(|expiry| expiry - EXPIRY_MARGIN_MS <= now_ms)
    }

    fn from_response(response: TokenResponse, previous_refresh: Option<String>, now_ms: i64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expiry_date: response.expires_in.map(|secs| now_ms + secs * 1000),
            scope: response.scope,
            token_type: response.token_type,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    next_page_token: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps non-success statuses to crate errors, `404` becoming `NotFound`.
fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_else(|_| "<no body>".to_string());
    if status == StatusCode::NOT_FOUND {
        Err(Error::not_found(format!("{what}: {body}")))
    } else if status == StatusCode::UNAUTHORIZED {
        Err(Error::authentication(format!("{PROVIDER} ({what}): {body}")))
    } else {
        Err(Error::remote_api(status.as_u16(), body))
    }
}

pub struct GoogleDriveClient {
    config: GoogleOAuthConfig,
    settings: Arc<dyn SettingsStore>,
    http: Client,
    tokens: Mutex<Option<GoogleTokens>>,
}

impl GoogleDriveClient {
    /// Restores saved tokens from `settings`.
    pub fn new(
        config: GoogleOAuthConfig,
        settings: Arc<dyn SettingsStore>,
        http_timeout: Option<Duration>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(http_timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        let tokens = settings
            .get_as::<GoogleTokens>(SettingsKey::GoogleTokens)
            .unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable saved tokens: {e}");
                None
            });

        Ok(Self {
            config,
            settings,
            http,
            tokens: Mutex::new(tokens),
        })
    }

    fn save_tokens(&self, tokens: GoogleTokens) -> Result<()> {
        self.settings.set_as(SettingsKey::GoogleTokens, &tokens)?;
        *lock(&self.tokens) = Some(tokens);
        Ok(())
    }

    #[named]
    fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(form)
            .send()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        check_status(response, "token request")?
            .json::<TokenResponse>()
            .map_err(Error::from)
            .add_fn_name(function_path!())
    }

    fn refresh(&self, refresh_token: &str) -> Result<GoogleTokens> {
        tracing::info!("Refreshing {PROVIDER} access token");
        let response = self.request_tokens(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.inner().as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])?;
        let tokens = GoogleTokens::from_response(
            response,
            Some(refresh_token.to_string()),
            Utc::now().timestamp_millis(),
        );
        self.save_tokens(tokens.clone())?;
        Ok(tokens)
    }

    fn access_token(&self) -> Result<String> {
        if !self.is_authenticated() {
            return Err(Error::authentication(PROVIDER));
        }
        lock(&self.tokens)
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| Error::authentication(PROVIDER))
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.access_token()?))
    }

    fn file_url(id: &str) -> Result<Url> {
        let mut url = Url::parse(FILES_URL).map_err(|e| Error::configuration(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| Error::configuration("files url cannot be a base"))?
            .push(id);
        Ok(url)
    }
}

impl CloudDrive for GoogleDriveClient {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn is_authenticated(&self) -> bool {
        let tokens = lock(&self.tokens).clone();
        let Some(tokens) = tokens.filter(|t| !t.access_token.is_empty()) else {
            return false;
        };
        if !tokens.is_expired_at(Utc::now().timestamp_millis()) {
            return true;
        }

        match tokens.refresh_token.as_deref() {
            Some(refresh_token) => match self.refresh(refresh_token) {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!("Error refreshing token: {e}");
                    false
                }
            },
            None => {
                tracing::warn!("{PROVIDER} access token expired and no refresh token is saved");
                false
            }
        }
    }

    fn auth_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| Error::configuration(e.to_string()))?;
        Ok(url.into())
    }

    fn exchange_code(&self, code: &str) -> Result<()> {
        let response = self
            .request_tokens(&[
                ("code", code.trim()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.inner().as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .add_msg("Exchanging authorization code failed")?;
        let tokens = GoogleTokens::from_response(response, None, Utc::now().timestamp_millis());
        self.save_tokens(tokens)?;
        tracing::info!("{PROVIDER} authorization saved");
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        let tokens = lock(&self.tokens).take();
        if let Some(tokens) = tokens.filter(|t| !t.access_token.is_empty()) {
            tracing::info!("Revoking {PROVIDER} access token");
            let revoked = self
                .http
                .post(REVOKE_URL)
                .form(&[("token", tokens.access_token.as_str())])
                .send()
                .map_err(Error::from)
                .and_then(|r| check_status(r, "revoke"));
            if let Err(e) = revoked {
                tracing::error!("Token revocation failed, removing local tokens anyway: {e}");
            }
        }

        self.settings.delete(SettingsKey::GoogleTokens)?;
        tracing::info!("{PROVIDER} logout successful");
        Ok(())
    }

    #[named]
    fn upload(&self, local_file: &Path, name: &str) -> Result<RemoteFile> {
        let file = File::open(local_file)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        let len = file.metadata()?.len();

        let session = self
            .http
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header(AUTHORIZATION, self.bearer()?)
            .header("X-Upload-Content-Type", ZIP_MIME)
            .header("X-Upload-Content-Length", len.to_string())
            .json(&serde_json::json!({ "name": name, "parents": ["root"] }))
            .send()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        let session = check_status(session, "start upload")?;
        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| Error::remote_api(session.status().as_u16(), "upload session without location"))?;

        tracing::info!("Uploading {:?} ({} bytes) to {PROVIDER} as {}", local_file, len, name);
        let response = self
            .http
            .put(location)
            .header(CONTENT_TYPE, ZIP_MIME)
            .body(Body::sized(file, len))
            .send()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        check_status(response, "upload")?
            .json::<RemoteFile>()
            .map_err(Error::from)
            .add_fn_name(function_path!())
    }

    #[named]
    fn list_files(&self) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("pageSize", PAGE_SIZE.to_string()),
                ("fields", format!("nextPageToken,files({FILE_FIELDS})")),
                ("orderBy", "createdTime desc".to_string()),
                ("q", "trashed = false".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self
                .http
                .get(FILES_URL)
                .query(&query)
                .header(AUTHORIZATION, self.bearer()?)
                .send()
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
            let page: FileList = check_status(response, "list")?
                .json()
                .map_err(Error::from)
                .add_fn_name(function_path!())?;

            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("{PROVIDER} returned {} files", files.len());
        Ok(files)
    }

    #[named]
    fn download(&self, id: &str, destination: &Path) -> Result<()> {
        let mut response = self
            .http
            .get(Self::file_url(id)?)
            .query(&[("alt", "media")])
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        response = check_status(response, &format!("download {id}"))?;

        let mut file = File::create(destination)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        tracing::info!("Downloaded {} bytes from {PROVIDER} into {:?}", bytes, destination);
        Ok(())
    }

    #[named]
    fn delete_file(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(Self::file_url(id)?)
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        check_status(response, &format!("delete {id}"))?;
        tracing::info!("Backup {} deleted from {PROVIDER}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::settings::MemorySettings;
    use serde_json::json;

    fn config() -> GoogleOAuthConfig {
        GoogleOAuthConfig::builder()
            .client_id("client-123.apps.googleusercontent.com")
            .client_secret(RedactedString::builder().inner("very-secret").build())
            .redirect_uri("urn:ietf:wg:oauth:2.0:oob")
            .build()
    }

    fn client_with(settings: Arc<MemorySettings>) -> GoogleDriveClient {
        GoogleDriveClient::new(config(), settings, None).unwrap()
    }

    #[test]
    fn test_auth_url_contains_client_and_scope() {
        let client = client_with(Arc::new(MemorySettings::new()));
        let url = Url::parse(&client.auth_url().unwrap()).unwrap();
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with(AUTH_URL));
        assert!(params.contains(&("client_id".into(), "client-123.apps.googleusercontent.com".into())));
        assert!(params.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(params.contains(&("access_type".into(), "offline".into())));
    }

    #[test]
    fn test_not_authenticated_without_tokens() {
        let client = client_with(Arc::new(MemorySettings::new()));
        assert!(!client.is_authenticated());
        assert!(matches!(
            client.access_token().unwrap_err(),
            Error::Authentication(_)
        ));
    }

    #[test]
    fn test_saved_tokens_are_restored() {
        let settings = Arc::new(MemorySettings::new());
        let expiry = Utc::now().timestamp_millis() + 3_600_000;
        settings
            .set(
                SettingsKey::GoogleTokens,
                json!({"access_token": "ya29.token", "refresh_token": "1//r", "expiry_date": expiry}),
            )
            .unwrap();

        let client = client_with(settings);
        assert!(client.is_authenticated());
        assert_eq!(client.access_token().unwrap(), "ya29.token");
    }

    #[test]
    fn test_expired_without_refresh_token_is_not_authenticated() {
        let settings = Arc::new(MemorySettings::new());
        settings
            .set(
                SettingsKey::GoogleTokens,
                json!({"access_token": "ya29.token", "expiry_date": 1000}),
            )
            .unwrap();

        assert!(!client_with(settings).is_authenticated());
    }

    #[test]
    fn test_token_expiry() {
        let tokens = GoogleTokens {
            access_token: "a".into(),
            refresh_token: None,
            expiry_date: Some(100_000),
            scope: None,
            token_type: None,
        };
        assert!(!tokens.is_expired_at(0));
        assert!(tokens.is_expired_at(80_000));
        assert!(!GoogleTokens {
            expiry_date: None,
            ..tokens
        }
        .is_expired_at(i64::MAX));
    }

    #[test]
    fn test_refresh_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".into(),
            expires_in: Some(3599),
            refresh_token: None,
            scope: None,
            token_type: Some("Bearer".into()),
        };
        let tokens = GoogleTokens::from_response(response, Some("old-refresh".into()), 1_000);
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(tokens.expiry_date, Some(3_600_000));
    }

    #[test]
    fn test_file_url_escapes_id() {
        assert_eq!(
            GoogleDriveClient::file_url("a/b").unwrap().as_str(),
            "https://www.googleapis.com/drive/v3/files/a%2Fb"
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        let invalid = GoogleOAuthConfig::builder()
            .client_id("")
            .client_secret(RedactedString::builder().inner("very-secret").build())
            .redirect_uri("not a url")
            .build();
        let errors = invalid.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("client_id"));
        assert!(errors.field_errors().contains_key("redirect_uri"));
    }
}
