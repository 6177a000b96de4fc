//! Dropbox API Types and Constants
//!
//! This module defines the client configuration, the chunked upload session
//! types and the JSON payloads decoded from Dropbox responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::{DropboxError, Result};

/// Default hosts for the Dropbox v1 API
pub const DEFAULT_API_HOST: &str = "https://api.dropbox.com";
pub const DEFAULT_CONTENT_HOST: &str = "https://api-content.dropbox.com";

/// Default number of bytes per chunked upload request (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Uploads of unknown size or larger than this go through the chunked endpoint
pub const AUTO_CHUNKED_UPLOAD_THRESHOLD: u64 = 9_863_168;

/// Retries after the first attempt of each network operation in a chunked upload
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Response header carrying file metadata on downloads
pub const METADATA_HEADER: &str = "x-dropbox-metadata";

/// Environment variable read by [`ClientConfig::from_env`]
pub const ACCESS_TOKEN_ENV: &str = "DROPBOX_ACCESS_TOKEN";

/// Which part of the user's Dropbox the access token can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    /// Full access to the user's Dropbox
    #[default]
    Dropbox,
    /// Access limited to the app's own folder
    AppFolder,
}

impl AccessType {
    /// The root segment used in file URLs
    pub fn url_part(self) -> &'static str {
        match self {
            AccessType::Dropbox => "dropbox",
            AccessType::AppFolder => "sandbox",
        }
    }

    fn from_auth_name(name: &str) -> Option<Self> {
        match name {
            "FullDropbox" | "dropbox" => Some(AccessType::Dropbox),
            "AppFolder" | "sandbox" => Some(AccessType::AppFolder),
            _ => None,
        }
    }
}

/// What to do when a file already exists at the destination path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Never overwrite; the server picks a conflict-free name instead
    Add,
    /// Always overwrite the existing file
    Force,
    /// Overwrite only if the existing file is at the given revision
    Update(String),
}

impl WriteMode {
    /// Query/form parameters this mode adds to upload requests
    pub fn extra_params(&self) -> Vec<(&'static str, String)> {
        match self {
            WriteMode::Add => vec![("overwrite", "false".to_string())],
            WriteMode::Force => vec![("overwrite", "true".to_string())],
            WriteMode::Update(rev) => vec![("parent_rev", rev.clone())],
        }
    }
}

/// Opaque, server-issued identifier of an in-progress chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadSessionId(String);

impl UploadSessionId {
    /// Wraps a session id, e.g. one persisted to resume an upload
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UploadSessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Result of one append attempt on an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The server stored the chunk right after the claimed offset
    Committed,
    /// The server does not know the session id
    SessionUnknown,
    /// The server is at a different offset than the one claimed
    OffsetMismatch(u64),
}

/// Lifecycle of a chunked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing sent yet
    NotStarted,
    /// Session created with the first chunk
    Started,
    /// Appending further chunks
    Uploading,
    /// Committing the session to a file
    Finalizing,
    /// File created
    Done,
    /// Aborted by an error
    Failed,
}

/// Metadata for a file or folder, as returned by upload, download and file operations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Size in bytes
    pub bytes: u64,
    /// Human readable size, e.g. "2.3 MB"
    pub size: String,
    /// Path in the user's Dropbox, with the user's casing
    pub path: String,
    /// Whether this entry is a folder
    pub is_dir: bool,
    /// Whether this entry has been deleted
    pub is_deleted: bool,
    /// Revision identifier, usable with [`WriteMode::Update`]
    pub rev: Option<String>,
    /// Last modification time on the server
    pub modified: Option<String>,
    /// Modification time reported by the uploading client
    pub client_mtime: Option<String>,
    /// Guessed MIME type of a file
    pub mime_type: Option<String>,
    /// Either "dropbox" or "app_folder"
    pub root: Option<String>,
    /// Icon name for display purposes
    pub icon: Option<String>,
    /// Whether a thumbnail can be generated
    pub thumb_exists: bool,
}

/// Quota usage of an account, in bytes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaInfo {
    /// Total quota
    pub quota: u64,
    /// Bytes used by files the user owns
    pub normal: u64,
    /// Bytes used by shared folders
    pub shared: u64,
}

/// Basic account information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountInfo {
    /// Numeric user id
    pub uid: u64,
    /// Name shown to other users
    pub display_name: String,
    /// Account e-mail
    pub email: Option<String>,
    /// Two-letter country code
    pub country: Option<String>,
    /// Referral URL
    pub referral_link: Option<String>,
    /// Quota usage
    pub quota_info: QuotaInfo,
}

/// Client configuration options
#[derive(Clone)]
pub struct ClientConfig {
    /// OAuth 2 access token sent as a bearer token
    pub access_token: String,
    /// Base URL of the API host (metadata and file operations)
    pub api_host: String,
    /// Base URL of the content host (uploads and downloads)
    pub content_host: String,
    /// Root the access token is scoped to
    pub access_type: AccessType,
    /// Locale passed to the server for localized messages
    pub locale: Option<String>,
    /// Identifies the calling application in the User-Agent header
    pub client_identifier: String,
    /// Timeout for establishing connections in milliseconds
    pub connect_timeout: u64,
    /// Read timeout in milliseconds
    ///
    /// Applies to each wait for data from the server, so long downloads
    /// keep going as long as bytes keep arriving.
    pub network_timeout: u64,
    /// Retries per network operation during chunked uploads
    pub max_retries: u32,
    /// Bytes per chunked upload request
    pub chunk_size: usize,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("access_token", &"<redacted>")
            .field("api_host", &self.api_host)
            .field("content_host", &self.content_host)
            .field("access_type", &self.access_type)
            .field("locale", &self.locale)
            .field("client_identifier", &self.client_identifier)
            .field("connect_timeout", &self.connect_timeout)
            .field("network_timeout", &self.network_timeout)
            .field("max_retries", &self.max_retries)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_host: DEFAULT_API_HOST.to_string(),
            content_host: DEFAULT_CONTENT_HOST.to_string(),
            access_type: AccessType::Dropbox,
            locale: None,
            client_identifier: "dropbox-client-rust".to_string(),
            connect_timeout: 10000,
            network_timeout: 120000,
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Deserialize)]
struct AuthFile {
    app: Option<AuthFileApp>,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct AuthFileApp {
    access_type: Option<String>,
    host: Option<String>,
}

impl ClientConfig {
    /// Creates a new client configuration with an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Reads the access token from `DROPBOX_ACCESS_TOKEN`
    pub fn from_env() -> Result<Self> {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(DropboxError::Config(format!(
                "environment variable {} is not set",
                ACCESS_TOKEN_ENV
            ))),
        }
    }

    /// Loads an auth-info JSON file
    ///
    /// The file looks like:
    ///
    /// ```json
    /// {"app": {"key": "...", "secret": "...", "access_type": "AppFolder"},
    ///  "access_token": "..."}
    /// ```
    ///
    /// `app.access_type` defaults to full Dropbox access. When `app.host` is
    /// given, the API and content hosts are derived from it.
    pub fn from_auth_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            DropboxError::Config(format!("cannot read \"{}\": {}", path.display(), e))
        })?;
        Self::from_auth_json(&raw)
    }

    /// Parses the contents of an auth-info file, see [`Self::from_auth_file`]
    pub fn from_auth_json(raw: &[u8]) -> Result<Self> {
        let auth: AuthFile = serde_json::from_slice(raw)
            .map_err(|e| DropboxError::Config(format!("JSON parse error: {}", e)))?;

        let token = auth
            .access_token
            .ok_or_else(|| DropboxError::Config("missing field \"access_token\"".to_string()))?;
        let mut config = Self::new(token);

        let app = auth
            .app
            .ok_or_else(|| DropboxError::Config("missing field \"app\"".to_string()))?;
        if let Some(name) = app.access_type {
            config.access_type = AccessType::from_auth_name(&name).ok_or_else(|| {
                DropboxError::Config(format!("bad \"app\" field: unknown access_type {:?}", name))
            })?;
        }
        if let Some(host) = app.host {
            config.api_host = format!("https://api.{}", host);
            config.content_host = format!("https://api-content.{}", host);
        }
        Ok(config)
    }

    /// Points both API and content requests at one base URL
    pub fn with_host(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.api_host = base_url.clone();
        self.content_host = base_url;
        self
    }

    /// Sets the API host base URL
    pub fn with_api_host(mut self, base_url: impl Into<String>) -> Self {
        self.api_host = base_url.into();
        self
    }

    /// Sets the content host base URL
    pub fn with_content_host(mut self, base_url: impl Into<String>) -> Self {
        self.content_host = base_url.into();
        self
    }

    /// Sets the access type
    pub fn with_access_type(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    /// Sets the locale
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the client identifier
    pub fn with_client_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.client_identifier = identifier.into();
        self
    }

    /// Sets the connection timeout in milliseconds
    pub fn with_connect_timeout(mut self, timeout: u64) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout in milliseconds
    pub fn with_network_timeout(mut self, timeout: u64) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Sets the retries per network operation
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the chunk size for chunked uploads
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}
