//! Dropbox Operations
//!
//! This module implements the endpoint calls (account info, upload,
//! download, file operations and the chunked upload session calls) on top of
//! an [`HttpTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::errors::{map_status_to_error, DropboxError, Result};
use crate::protocol::*;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::*;
use crate::upload::SessionTransport;

/// Handles all Dropbox endpoint calls
///
/// This struct is used internally by the Client, and is exposed so the
/// session calls can be driven directly, e.g. to resume an upload from a
/// persisted session id and offset.
pub struct Operations {
    transport: Arc<dyn HttpTransport>,
    api_host: String,
    content_host: String,
    root: &'static str,
    locale: Option<String>,
}

impl Operations {
    /// Creates a new Operations handler
    pub fn new(transport: Arc<dyn HttpTransport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            api_host: config.api_host.clone(),
            content_host: config.content_host.clone(),
            root: config.access_type.url_part(),
            locale: config.locale.clone(),
        }
    }

    fn url(&self, host: &str, path: &str, params: &[(&str, String)]) -> String {
        build_url(host, path, params, self.locale.as_deref())
    }

    fn file_path(&self, base: &str, path: &str) -> String {
        append_file_path(base, self.root, path)
    }

    /// Issues a GET against `host`
    pub async fn do_get(&self, host: &str, path: &str, params: &[(&str, String)]) -> Result<HttpResponse> {
        self.transport
            .execute(HttpRequest::get(self.url(host, path, params)))
            .await
    }

    /// Issues a form-encoded POST against `host`
    pub async fn do_post(&self, host: &str, path: &str, params: &[(&str, String)]) -> Result<HttpResponse> {
        let mut form = params.to_vec();
        if let Some(locale) = &self.locale {
            form.push(("locale", locale.clone()));
        }
        let url = build_url(host, path, &[], None);
        self.transport
            .execute(HttpRequest::post_form(url, &form))
            .await
    }

    /// Returns basic account and quota information
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let response = self.do_get(&self.api_host, "1/account/info", &[]).await?;
        expect_ok(&response)?;
        parse_json(&response.body)
    }

    /// Downloads a file into memory; `None` if nothing exists at `path`
    pub async fn get_file(&self, path: &str, rev: Option<&str>) -> Result<Option<(Metadata, Bytes)>> {
        let url = self.url(&self.content_host, &self.file_path("1/files", path), &rev_param(rev));
        let response = self.transport.execute(HttpRequest::get(url)).await?;

        if response.status == 404 {
            return Ok(None);
        }
        expect_ok(&response)?;

        let metadata = metadata_from_headers(&response.headers)?;
        Ok(Some((metadata, response.body)))
    }

    /// Streams a file into `writer`; `None` if nothing exists at `path`
    pub async fn get_file_to_writer<W>(
        &self,
        path: &str,
        writer: &mut W,
        rev: Option<&str>,
    ) -> Result<Option<Metadata>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = self.url(&self.content_host, &self.file_path("1/files", path), &rev_param(rev));
        let response = self.transport.execute_streaming(HttpRequest::get(url)).await?;

        if response.status == 404 {
            return Ok(None);
        }
        if response.status != 200 {
            let response = response.collect().await?;
            return Err(map_status_to_error(response.status, &response.body));
        }

        let metadata = metadata_from_headers(&response.headers)?;
        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        debug!(path, bytes = written, "download complete");

        Ok(Some(metadata))
    }

    /// Uploads a whole file in a single request
    pub async fn upload_bytes(&self, path: &str, write_mode: &WriteMode, data: Bytes) -> Result<Metadata> {
        let url = self.url(
            &self.content_host,
            &self.file_path("1/files_put", path),
            &write_mode.extra_params(),
        );
        let response = self.transport.execute(HttpRequest::put_bytes(url, data)).await?;
        expect_ok(&response)?;
        parse_json(&response.body)
    }

    /// Creates a folder; `None` if something already exists at `path`
    pub async fn create_folder(&self, path: &str) -> Result<Option<Metadata>> {
        let params = [("root", self.root.to_string()), ("path", path.to_string())];
        let response = self
            .do_post(&self.api_host, "1/fileops/create_folder", &params)
            .await?;

        if response.status == 403 {
            return Ok(None);
        }
        expect_ok(&response)?;
        parse_json(&response.body).map(Some)
    }

    /// Deletes a file or folder
    pub async fn delete(&self, path: &str) -> Result<Metadata> {
        let params = [("root", self.root.to_string()), ("path", path.to_string())];
        let response = self.do_post(&self.api_host, "1/fileops/delete", &params).await?;
        expect_ok(&response)?;
        parse_json(&response.body)
    }

    /// Copies a file or folder
    pub async fn copy(&self, from_path: &str, to_path: &str) -> Result<Metadata> {
        self.file_op("1/fileops/copy", from_path, to_path).await
    }

    /// Moves a file or folder
    pub async fn move_file(&self, from_path: &str, to_path: &str) -> Result<Metadata> {
        self.file_op("1/fileops/move", from_path, to_path).await
    }

    async fn file_op(&self, endpoint: &str, from_path: &str, to_path: &str) -> Result<Metadata> {
        let params = [
            ("root", self.root.to_string()),
            ("from_path", from_path.to_string()),
            ("to_path", to_path.to_string()),
        ];
        let response = self.do_post(&self.api_host, endpoint, &params).await?;
        expect_ok(&response)?;
        parse_json(&response.body)
    }

    async fn chunked_upload(&self, params: &[(&str, String)], data: Bytes) -> Result<HttpResponse> {
        let url = self.url(&self.content_host, "1/chunked_upload", params);
        self.transport.execute(HttpRequest::put_bytes(url, data)).await
    }
}

#[async_trait]
impl SessionTransport for Operations {
    async fn start(&self, chunk: Bytes) -> Result<UploadSessionId> {
        let len = chunk.len() as u64;
        let response = self.chunked_upload(&[], chunk).await?;

        if response.status == 404 {
            return Err(DropboxError::Protocol(
                "got a 404, but we didn't send up an 'upload_id'".to_string(),
            ));
        }
        if check_for_offset_correction(response.status, &response.body).is_some() {
            return Err(DropboxError::Protocol(
                "got an offset-correcting 400 response, but we didn't send an offset".to_string(),
            ));
        }
        expect_ok(&response)?;

        let (session_id, offset) = parse_session_response(&response.body)?;
        if offset != len {
            return Err(DropboxError::Protocol(format!(
                "we sent {} bytes, but server returned an offset of {}",
                len, offset
            )));
        }
        Ok(session_id)
    }

    async fn append(
        &self,
        session_id: &UploadSessionId,
        offset: u64,
        chunk: Bytes,
    ) -> Result<AppendOutcome> {
        let next_offset = offset + chunk.len() as u64;
        let params = [
            ("upload_id", session_id.as_str().to_string()),
            ("offset", offset.to_string()),
        ];
        let response = self.chunked_upload(&params, chunk).await?;

        if response.status == 404 {
            return Ok(AppendOutcome::SessionUnknown);
        }

        if let Some((corrected_id, corrected_offset)) =
            check_for_offset_correction(response.status, &response.body)
        {
            if &corrected_id != session_id {
                return Err(DropboxError::Protocol(format!(
                    "corrective 400 upload_id mismatch: us={:?} server={:?}",
                    session_id.as_str(),
                    corrected_id.as_str()
                )));
            }
            return Ok(AppendOutcome::OffsetMismatch(corrected_offset));
        }
        expect_ok(&response)?;

        let (returned_id, returned_offset) = parse_session_response(&response.body)?;
        if &returned_id != session_id {
            return Err(DropboxError::Protocol(format!(
                "upload_id mismatch: us={:?}, server={:?}",
                session_id.as_str(),
                returned_id.as_str()
            )));
        }
        if returned_offset != next_offset {
            return Err(DropboxError::Protocol(format!(
                "next-offset mismatch: us={}, server={}",
                next_offset, returned_offset
            )));
        }
        Ok(AppendOutcome::Committed)
    }

    async fn finish(
        &self,
        session_id: &UploadSessionId,
        path: &str,
        write_mode: &WriteMode,
    ) -> Result<Option<Metadata>> {
        let mut params = vec![("upload_id", session_id.as_str().to_string())];
        params.extend(write_mode.extra_params());

        let response = self
            .do_post(
                &self.content_host,
                &self.file_path("1/commit_chunked_upload", path),
                &params,
            )
            .await?;

        if response.status == 404 {
            return Ok(None);
        }
        expect_ok(&response)?;
        parse_json(&response.body).map(Some)
    }
}

fn expect_ok(response: &HttpResponse) -> Result<()> {
    if response.status == 200 {
        Ok(())
    } else {
        Err(map_status_to_error(response.status, &response.body))
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

fn rev_param(rev: Option<&str>) -> Vec<(&'static str, String)> {
    rev.map(|r| vec![("rev", r.to_string())]).unwrap_or_default()
}

fn metadata_from_headers(headers: &reqwest::header::HeaderMap) -> Result<Metadata> {
    let value = headers.get(METADATA_HEADER).ok_or_else(|| {
        DropboxError::Protocol(format!("response is missing the {} header", METADATA_HEADER))
    })?;
    parse_metadata_header(value.as_bytes())
}
