//! Google Drive storage over the Drive v3 REST API.
//!
//! Credentials come from an OAuth2 client secret file (as downloaded from the
//! Google Cloud console) and a token file written by `backupman auth-google`.
//! Access tokens are refreshed in memory when they expire.

use super::{file_name, object_name, sha256_file, suffixed_object_name, Drive, StoredFile};
use crate::config::GoogleDriveConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const MULTIPART_BOUNDARY: &str = "backupman-upload-boundary";

/// OAuth2 client credentials, either the `installed` or `web` flavor
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

/// Stored OAuth2 token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    id: String,
    name: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl ClientSecret {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!(
                "unable to read client secret file ({}): {}",
                path.display(),
                e
            ))
        })?;
        let file: ClientSecretFile = serde_json::from_str(&content)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| Error::config("client secret file has no installed or web section"))
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or("http://localhost")
    }

    /// URL the user opens to grant offline access to Drive files
    pub fn authorization_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.auth_uri)
            .map_err(|e| Error::config(format!("invalid auth_uri: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri())
            .append_pair("response_type", "code")
            .append_pair("scope", DRIVE_FILE_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("state", "state-token");
        Ok(url.to_string())
    }

    /// Trade an authorization code for a token
    pub async fn exchange_code(&self, client: &reqwest::Client, code: &str) -> Result<Token> {
        let response = client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;
        Ok(token.into_token(None))
    }

    async fn refresh(&self, client: &reqwest::Client, refresh_token: &str) -> Result<Token> {
        let response = client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;
        Ok(token.into_token(Some(refresh_token)))
    }
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expiry: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

impl Token {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!(
                "unable to read token file ({}): {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .map(|expiry| expiry - Duration::seconds(60) <= now)
            .unwrap_or(false)
    }
}

/// Pull the `code` parameter out of the URL the browser was redirected to
pub fn code_from_redirect(redirect: &str) -> Result<String> {
    let url = Url::parse(redirect.trim()).map_err(|e| Error::InvalidRequest {
        reason: format!("invalid redirect URL: {}", e),
    })?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("no authorization code found in URL {}", url),
        })
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub struct GoogleDrive {
    label: String,
    folder: String,
    secret: ClientSecret,
    token: Mutex<Token>,
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
}

impl GoogleDrive {
    pub fn new(label: &str, folder: &str, secret: ClientSecret, token: Token) -> Self {
        Self {
            label: label.to_string(),
            folder: folder.to_string(),
            secret,
            token: Mutex::new(token),
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        }
    }

    pub async fn from_config(config: &GoogleDriveConfig) -> Result<Self> {
        let secret = ClientSecret::load(&config.client_secret_file).await?;
        let token = Token::load(&config.token_file).await?;
        Ok(Self::new(&config.label, &config.folder, secret, token))
    }

    /// Point the drive at other API hosts
    pub fn with_endpoints(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    fn error(&self, reason: impl ToString) -> Error {
        Error::drive(&self.label, reason)
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_expired(Utc::now()) {
            let refresh_token = token
                .refresh_token
                .clone()
                .ok_or_else(|| self.error("access token expired and no refresh token stored"))?;
            debug!("Refreshing Google Drive access token for {}", self.label);
            *token = self
                .secret
                .refresh(&self.client, &refresh_token)
                .await
                .map_err(|e| self.error(format!("token refresh failed: {}", e)))?;
        }
        Ok(token.access_token.clone())
    }

    async fn list(&self, query: &str) -> Result<Vec<RemoteFile>> {
        let token = self.access_token().await?;
        let list: FileList = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("spaces", "drive"),
                ("fields", "files(id, name)"),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| self.error(format!("file listing failed: {}", e)))?
            .json()
            .await?;
        Ok(list.files)
    }

    async fn find_folder(&self) -> Result<Option<String>> {
        let query = format!(
            "mimeType='{}' and name='{}' and trashed=false",
            FOLDER_MIME_TYPE,
            escape_query(&self.folder)
        );
        Ok(self.list(&query).await?.into_iter().next().map(|f| f.id))
    }

    async fn exists_in_folder(&self, folder_id: &str, name: &str) -> Result<bool> {
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(folder_id)
        );
        Ok(!self.list(&query).await?.is_empty())
    }

    async fn find_or_create_folder(&self) -> Result<String> {
        if let Some(id) = self.find_folder().await? {
            return Ok(id);
        }
        info!("Creating Google Drive folder {}", self.folder);
        let token = self.access_token().await?;
        let folder: RemoteFile = self
            .client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "name": self.folder,
                "mimeType": FOLDER_MIME_TYPE,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| self.error(format!("failed to create folder: {}", e)))?
            .json()
            .await?;
        Ok(folder.id)
    }
}

fn multipart_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            m = metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

#[async_trait]
impl Drive for GoogleDrive {
    fn label(&self) -> &str {
        &self.label
    }

    fn provider(&self) -> &'static str {
        "google_drive"
    }

    /// Stores under the Drive file id, so deletes never touch other files
    async fn upload(&self, file: &Path) -> Result<StoredFile> {
        let folder_id = self.find_or_create_folder().await?;
        let now = Utc::now();
        let mut name = object_name(file, now);
        if self.exists_in_folder(&folder_id, &name).await? {
            name = suffixed_object_name(file, now);
        }
        let content = tokio::fs::read(file).await?;
        let checksum = sha256_file(file).await?;
        let metadata = serde_json::json!({
            "name": name,
            "parents": [folder_id],
        });

        let token = self.access_token().await?;
        let uploaded: RemoteFile = self
            .client
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id, name")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(multipart_body(&metadata, &content))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                self.error(format!("unable to upload {}: {}", file.display(), e))
            })?
            .json()
            .await?;

        debug!(
            "Uploaded {} to Google Drive as {} ({})",
            file_name(file)?,
            uploaded.name,
            uploaded.id
        );
        Ok(StoredFile {
            path: uploaded.id,
            checksum,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(format!("{}/files/{}", self.api_base, path))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("File {} not found on Google Drive {}", path, self.label);
            return Ok(());
        }
        response
            .error_for_status()
            .map_err(|e| self.error(format!("unable to delete {}: {}", path, e)))?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.access_token().await?;
        self.find_folder().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    fn secret(server: &MockServer) -> ClientSecret {
        ClientSecret {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: default_auth_uri(),
            token_uri: format!("{}/token", server.uri()),
            redirect_uris: vec!["http://localhost".to_string()],
        }
    }

    fn token(expired: bool) -> Token {
        Token {
            access_token: "old-token".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh".to_string()),
            expiry: Some(if expired {
                Utc::now() - Duration::hours(1)
            } else {
                Utc::now() + Duration::hours(1)
            }),
        }
    }

    fn drive(server: &MockServer, expired: bool) -> GoogleDrive {
        GoogleDrive::new("gdrive", "backups", secret(server), token(expired))
            .with_endpoints(&server.uri(), &format!("{}/upload", server.uri()))
    }

    /// Matches file listings whose `q` parameter contains the given text
    struct QueryContains(&'static str);

    impl Match for QueryContains {
        fn matches(&self, request: &Request) -> bool {
            request
                .url
                .query_pairs()
                .any(|(key, value)| key == "q" && value.contains(self.0))
        }
    }

    fn empty_listing() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []}))
    }

    async fn mount_folder(server: &MockServer, folder_id: &str) {
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(QueryContains("mimeType="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": folder_id, "name": "backups"}]
            })))
            .mount(server)
            .await;
    }

    fn uploaded_names(requests: &[Request]) -> Vec<String> {
        requests
            .iter()
            .filter(|r| r.url.path() == "/upload/files")
            .filter_map(|r| {
                let body = String::from_utf8_lossy(&r.body).into_owned();
                let start = body.find("\"name\":\"")? + "\"name\":\"".len();
                let end = body[start..].find('"')? + start;
                Some(body[start..end].to_string())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upload_refreshes_token_and_reuses_folder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer new-token"))
            .and(QueryContains("mimeType="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "folder-1", "name": "backups"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(QueryContains("'folder-1' in parents"))
            .respond_with(empty_listing())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .and(query_param("uploadType", "multipart"))
            .and(body_string_contains("folder-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-1",
                "name": "20250101000000.sql"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        std::fs::write(&source, b"abc").unwrap();

        let stored = drive(&server, true).upload(&source).await.unwrap();
        assert_eq!(stored.path, "file-1");
        assert_eq!(
            stored.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_upload_creates_missing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(empty_listing())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_string_contains(FOLDER_MIME_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "folder-2",
                "name": "backups"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .and(body_string_contains("folder-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-2",
                "name": "20250101000000.db"
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.db");
        std::fs::write(&source, b"data").unwrap();

        let stored = drive(&server, false).upload(&source).await.unwrap();
        assert_eq!(stored.path, "file-2");
    }

    #[tokio::test]
    async fn test_same_second_uploads_get_distinct_names() {
        let server = MockServer::start().await;
        mount_folder(&server, "folder-1").await;
        // the first name is free, afterwards it is taken
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(QueryContains("'folder-1' in parents"))
            .respond_with(empty_listing())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(QueryContains("'folder-1' in parents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "file-1", "name": "taken.sql"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-1",
                "name": "uploaded.sql"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        std::fs::write(&source, b"abc").unwrap();
        let drive = drive(&server, false);
        drive.upload(&source).await.unwrap();
        drive.upload(&source).await.unwrap();

        let names = uploaded_names(&server.received_requests().await.unwrap());
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
        assert_eq!(names[0].len(), "20250101000000.sql".len());
        assert!(names[1].ends_with(".sql"));
        assert_eq!(names[1].len(), "20250101000000-abcdef12.sql".len());
    }

    #[tokio::test]
    async fn test_delete_targets_only_the_stored_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"id": "file-9", "name": "20250101000000.sql"},
                    {"id": "file-10", "name": "20250101000000.sql"}
                ]
            })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/file-9"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/file-10"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        drive(&server, false).delete("file-9").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/locked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let drive = drive(&server, false);
        drive.delete("gone").await.unwrap();
        assert!(matches!(
            drive.delete("locked").await,
            Err(Error::Drive { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token() {
        let server = MockServer::start().await;
        let mut expired = token(true);
        expired.refresh_token = None;
        let drive = GoogleDrive::new("gdrive", "backups", secret(&server), expired)
            .with_endpoints(&server.uri(), &server.uri());

        let err = drive.health().await.unwrap_err();
        assert!(err.to_string().contains("no refresh token"));
    }

    #[test]
    fn test_authorization_url_and_redirect_code() {
        let secret = ClientSecret {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            redirect_uris: vec![],
        };
        let url = secret.authorization_url().unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("client_id=client"));

        assert_eq!(
            code_from_redirect("http://localhost/?state=state-token&code=4%2Fabc").unwrap(),
            "4/abc"
        );
        assert!(code_from_redirect("http://localhost/?state=x").is_err());
    }

    #[tokio::test]
    async fn test_client_secret_file_formats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"s","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        let secret = ClientSecret::load(&path).await.unwrap();
        assert_eq!(secret.client_id, "id");
        assert_eq!(secret.token_uri, default_token_uri());

        std::fs::write(&path, r#"{"other":{}}"#).unwrap();
        assert!(ClientSecret::load(&path).await.is_err());
    }
}
