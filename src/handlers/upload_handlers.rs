//! Resumable upload endpoints (tus 1.0.0, `creation` and `checksum`
//! extensions).
//!
//! - `OPTIONS /files`       capabilities
//! - `POST    /files`       create an upload from `Upload-Length` / `Upload-Metadata`
//! - `GET     /files`       snapshots of the active uploads
//! - `HEAD    /files/{id}`  current offset and length
//! - `PATCH   /files/{id}`  append one chunk at `Upload-Offset`

use crate::{errors::AppError, models::is_valid_id, state::AppState};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use std::collections::{BTreeMap, HashMap};

pub const TUS_VERSION: &str = "1.0.0";
pub const TUS_EXTENSIONS: &str = "creation,checksum";
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
const TUS_CHECKSUM_ALGORITHM: HeaderName = HeaderName::from_static("tus-checksum-algorithm");
const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
const UPLOAD_CHECKSUM: HeaderName = HeaderName::from_static("upload-checksum");

/// Non-standard status used by tus for a failed checksum.
const CHECKSUM_MISMATCH: u16 = 460;

fn tus_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    headers
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_u64_header(headers: &HeaderMap, name: &HeaderName) -> Result<u64, AppError> {
    let raw = header_str(headers, name)
        .ok_or_else(|| AppError::bad_request(format!("missing {} header", name)))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::bad_request(format!("invalid {} header `{}`", name, raw)))
}

/// Decode `Upload-Metadata`: comma-separated `key base64(value)` pairs.
/// A key may appear without a value.
pub fn parse_upload_metadata(raw: &str) -> Result<HashMap<String, String>, String> {
    let mut metadata = HashMap::new();
    if raw.trim().is_empty() {
        return Ok(metadata);
    }

    for pair in raw.split(',') {
        let pair = pair.trim();
        let (key, encoded) = match pair.split_once(' ') {
            Some((key, value)) => (key, value.trim()),
            None => (pair, ""),
        };
        if key.is_empty() {
            return Err(format!("empty metadata key in `{}`", pair));
        }
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| format!("metadata `{}`: {}", key, err))?;
        let value = String::from_utf8(decoded)
            .map_err(|_| format!("metadata `{}` is not valid UTF-8", key))?;
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Encode metadata back into the `Upload-Metadata` form, keys sorted.
pub fn encode_upload_metadata(metadata: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<_, _> = metadata.iter().collect();
    sorted
        .into_iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{} {}", key, general_purpose::STANDARD.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse `Upload-Checksum: md5 <base64>` into the expected digest.
pub fn parse_checksum(raw: &str) -> Result<[u8; 16], String> {
    let (algorithm, encoded) = raw
        .trim()
        .split_once(' ')
        .ok_or_else(|| format!("malformed checksum `{}`", raw))?;
    if !algorithm.eq_ignore_ascii_case("md5") {
        return Err(format!("unsupported checksum algorithm `{}`", algorithm));
    }
    let digest = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| format!("checksum: {}", err))?;
    digest
        .try_into()
        .map_err(|_| "md5 checksum must be 16 bytes".to_string())
}

fn verify_checksum(headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    let Some(raw) = header_str(headers, &UPLOAD_CHECKSUM) else {
        return Ok(());
    };
    let expected = parse_checksum(raw).map_err(AppError::bad_request)?;
    if md5::compute(body).0 != expected {
        let status = StatusCode::from_u16(CHECKSUM_MISMATCH).unwrap_or(StatusCode::BAD_REQUEST);
        return Err(AppError::new(status, "checksum mismatch"));
    }
    Ok(())
}

fn check_id(id: &str) -> Result<(), AppError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(AppError::not_found(format!("upload `{}` not found", id)))
    }
}

/// `OPTIONS /files`
pub async fn upload_options(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = tus_headers();
    headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
    headers.insert(TUS_EXTENSION, HeaderValue::from_static(TUS_EXTENSIONS));
    headers.insert(TUS_CHECKSUM_ALGORITHM, HeaderValue::from_static("md5"));
    if let Some(max) = state.uploads.max_size() {
        headers.insert(TUS_MAX_SIZE, HeaderValue::from(max));
    }
    (StatusCode::NO_CONTENT, headers)
}

/// `POST /files`
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let size = parse_u64_header(&headers, &UPLOAD_LENGTH)?;
    let metadata = match header_str(&headers, &UPLOAD_METADATA) {
        Some(raw) => parse_upload_metadata(raw).map_err(AppError::bad_request)?,
        None => HashMap::new(),
    };

    let cancel = state.shutdown.child_token();
    let object_id = state.uploads.create_upload(size, metadata, &cancel).await?;

    let mut resp_headers = tus_headers();
    let location = HeaderValue::from_str(&format!("/files/{}", object_id))
        .map_err(|err| AppError::internal(err.to_string()))?;
    resp_headers.insert(header::LOCATION, location);
    Ok((StatusCode::CREATED, resp_headers).into_response())
}

/// `GET /files`
pub async fn list_uploads(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.uploads.list_uploads().await)
}

/// `HEAD /files/{id}`
pub async fn upload_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    check_id(&id)?;
    let upload = state.uploads.get_upload(&id).await?;

    let mut headers = tus_headers();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(upload.offset));
    headers.insert(UPLOAD_LENGTH, HeaderValue::from(upload.size));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if !upload.metadata.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&encode_upload_metadata(&upload.metadata)) {
            headers.insert(UPLOAD_METADATA, value);
        }
    }
    Ok((StatusCode::OK, headers).into_response())
}

/// `PATCH /files/{id}`
pub async fn write_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    check_id(&id)?;

    let content_type = header_str(&headers, &header::CONTENT_TYPE).unwrap_or_default();
    if content_type != OFFSET_OCTET_STREAM {
        return Err(AppError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("content type must be {}", OFFSET_OCTET_STREAM),
        ));
    }
    let offset = parse_u64_header(&headers, &UPLOAD_OFFSET)?;
    verify_checksum(&headers, &body)?;

    let cancel = state.shutdown.child_token();
    let new_offset = state.uploads.write_part(&id, offset, body, &cancel).await?;

    let mut resp_headers = tus_headers();
    resp_headers.insert(UPLOAD_OFFSET, HeaderValue::from(new_offset));
    Ok((StatusCode::NO_CONTENT, resp_headers).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_pairs() {
        let metadata = parse_upload_metadata("filename d29ybGRfZG9taW5hdGlvbi5wZGY=,is_confidential")
            .unwrap();
        assert_eq!(metadata["filename"], "world_domination.pdf");
        assert_eq!(metadata["is_confidential"], "");
    }

    #[test]
    fn rejects_bad_metadata() {
        assert!(parse_upload_metadata("filename !!!").is_err());
        assert!(parse_upload_metadata(",filename dGVzdA==").is_err());
    }

    #[test]
    fn metadata_encoding_is_sorted() {
        let mut metadata = HashMap::new();
        metadata.insert("b".to_string(), "2".to_string());
        metadata.insert("a".to_string(), "1".to_string());
        assert_eq!(encode_upload_metadata(&metadata), "a MQ==,b Mg==");
    }

    #[test]
    fn parses_md5_checksum() {
        let digest = md5::compute(b"hello").0;
        let header = format!("md5 {}", general_purpose::STANDARD.encode(digest));
        assert_eq!(parse_checksum(&header).unwrap(), digest);
    }

    #[test]
    fn rejects_other_checksum_algorithms() {
        assert!(parse_checksum("sha1 qZk+NkcGgWq6PiVxeFDCbJzQ2J0=").is_err());
        assert!(parse_checksum("md5").is_err());
        assert!(parse_checksum("md5 aGVsbG8=").is_err());
    }
}
