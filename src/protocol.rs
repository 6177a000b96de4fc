//! Dropbox Wire Encoding and Decoding
//!
//! This module handles URL construction, path validation and the parsing of
//! the small JSON documents exchanged by the chunked upload endpoints.

use serde_json::Value;

use crate::errors::{DropboxError, Result};
use crate::types::*;

/// Returns why `path` is not a valid Dropbox path, or `None` if it is
///
/// Paths are absolute ("/" separated, starting with "/") and, apart from
/// the root itself, never end with "/".
pub fn find_path_error(path: &str) -> Option<&'static str> {
    if !path.starts_with('/') {
        return Some("must start with \"/\"");
    }
    if path.len() == 1 {
        return None;
    }
    if path.ends_with('/') {
        return Some("must not end with \"/\"");
    }
    None
}

/// Checks that `value` is a valid path
pub fn check_path(arg_name: &str, value: &str) -> Result<()> {
    match find_path_error(value) {
        None => Ok(()),
        Some(err) => Err(DropboxError::InvalidArgument(format!(
            "'{}': bad path: {}: {:?}",
            arg_name, err, value
        ))),
    }
}

/// Checks that `value` is a valid path other than the root
pub fn check_path_non_root(arg_name: &str, value: &str) -> Result<()> {
    if value == "/" {
        return Err(DropboxError::InvalidArgument(format!(
            "'{}' must not be the root path",
            arg_name
        )));
    }
    check_path(arg_name, value)
}

/// Appends a Dropbox path to an endpoint, e.g. `1/files` + `/a b/c.txt`
/// gives `1/files/dropbox/a%20b/c.txt`
///
/// Each path segment is percent-encoded separately so the separators survive.
pub fn append_file_path(base: &str, root: &str, path: &str) -> String {
    let encoded = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}/{}", base, root, encoded)
}

/// Encodes parameters as `k1=v1&k2=v2`
pub fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds a full request URL
///
/// The locale, when configured, is appended as the `locale` parameter.
pub fn build_url(
    host: &str,
    path: &str,
    params: &[(&str, String)],
    locale: Option<&str>,
) -> String {
    let mut url = format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'));

    let mut all: Vec<(&str, String)> = params.to_vec();
    if let Some(locale) = locale {
        all.push(("locale", locale.to_string()));
    }
    if !all.is_empty() {
        url.push('?');
        url.push_str(&encode_params(&all));
    }
    url
}

/// Builds the User-Agent header value
pub fn user_agent(client_identifier: &str) -> String {
    format!(
        "{} DropboxRustSdk/{}",
        client_identifier,
        env!("CARGO_PKG_VERSION")
    )
}

/// Extracts the `upload_id` and `offset` fields of a session document
fn session_fields(json: &Value) -> (Option<&str>, Option<u64>) {
    (
        json.get("upload_id").and_then(Value::as_str),
        json.get("offset").and_then(Value::as_u64),
    )
}

/// Parses the 200 body of `/chunked_upload`
///
/// Returns the session id and the offset the server has committed.
pub fn parse_session_response(body: &[u8]) -> Result<(UploadSessionId, u64)> {
    let json: Value = serde_json::from_slice(body).map_err(|e| {
        DropboxError::Protocol(format!(
            "Malformed chunked upload response: {}: {}",
            e,
            String::from_utf8_lossy(body)
        ))
    })?;

    match session_fields(&json) {
        (Some(id), Some(offset)) => Ok((UploadSessionId::new(id), offset)),
        (None, _) => Err(DropboxError::Protocol(format!(
            "Missing field \"upload_id\": {}",
            String::from_utf8_lossy(body)
        ))),
        (_, None) => Err(DropboxError::Protocol(format!(
            "Missing field \"offset\": {}",
            String::from_utf8_lossy(body)
        ))),
    }
}

/// Recognizes the server's offset-correcting response
///
/// A correction is a 400 whose body is a JSON object carrying both the
/// session id and the server's offset. Any other 400 is an ordinary error.
pub fn check_for_offset_correction(status: u16, body: &[u8]) -> Option<(UploadSessionId, u64)> {
    if status != 400 {
        return None;
    }
    let json: Value = serde_json::from_slice(body).ok()?;
    match session_fields(&json) {
        (Some(id), Some(offset)) => Some((UploadSessionId::new(id), offset)),
        _ => None,
    }
}

/// Parses the JSON metadata sent in the `x-dropbox-metadata` header
pub fn parse_metadata_header(value: &[u8]) -> Result<Metadata> {
    serde_json::from_slice(value).map_err(|e| {
        DropboxError::Protocol(format!("Bad {} header: {}", METADATA_HEADER, e))
    })
}
