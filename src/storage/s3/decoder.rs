//! XML response decoding for the multipart listing API.
//!
//! Bodies are deserialized with `quick-xml`'s serde support into raw
//! structs mirroring the wire format, then validated into [`Page`]s. A
//! truncated page must carry its continuation markers; a page that claims
//! truncation without them is rejected as malformed.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::types::error::S3mpuError;
use crate::types::{Page, PartCursor, PartItem, UploadCursor, UploadItem};

/// Which kind of request produced an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Listing,
    Abort,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMultipartUploadsResult {
    is_truncated: Option<bool>,
    next_key_marker: Option<String>,
    next_upload_id_marker: Option<String>,
    #[serde(rename = "Upload", default)]
    uploads: Vec<RawUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawUpload {
    key: String,
    upload_id: String,
    initiated: Option<String>,
    storage_class: Option<String>,
    initiator: Option<RawInitiator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInitiator {
    #[serde(rename = "ID")]
    id: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPartsResult {
    is_truncated: Option<bool>,
    next_part_number_marker: Option<String>,
    #[serde(rename = "Part", default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPart {
    part_number: u32,
    last_modified: String,
    #[serde(rename = "ETag")]
    etag: String,
    size: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: Option<String>,
    message: Option<String>,
}

fn decode_error(message: impl Into<String>) -> anyhow::Error {
    anyhow!(S3mpuError::Decode(message.into()))
}

fn from_xml<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T> {
    let text = std::str::from_utf8(body).map_err(|e| decode_error(e.to_string()))?;
    quick_xml::de::from_str(text).map_err(|e| decode_error(e.to_string()))
}

// Servers send empty elements for unset markers.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_error(format!("invalid timestamp {value:?}: {e}")))
}

/// Decode a `ListMultipartUploadsResult` body into a page of uploads.
///
/// The next cursor keeps `bucket` and `prefix` and takes its markers from
/// `NextKeyMarker` / `NextUploadIdMarker`.
pub fn parse_list_multipart_result(
    bucket: &str,
    prefix: Option<&str>,
    body: &[u8],
) -> Result<Page<UploadItem, UploadCursor>> {
    let result: ListMultipartUploadsResult = from_xml(body)?;

    let mut items = Vec::with_capacity(result.uploads.len());
    for upload in result.uploads {
        let initiated = non_empty(upload.initiated).and_then(|value| match parse_timestamp(&value) {
            Ok(initiated) => Some(initiated),
            Err(e) => {
                warn!(key = %upload.key, error = %e, "ignoring unreadable Initiated value.");
                None
            }
        });
        let (initiator_id, initiator_name) = match upload.initiator {
            Some(initiator) => (non_empty(initiator.id), non_empty(initiator.display_name)),
            None => (None, None),
        };
        items.push(UploadItem {
            bucket: bucket.to_string(),
            key: upload.key,
            upload_id: upload.upload_id,
            initiated,
            storage_class: non_empty(upload.storage_class),
            initiator_id,
            initiator_name,
        });
    }

    if !result.is_truncated.unwrap_or(false) {
        return Ok(Page::terminal(items));
    }

    let key_marker = non_empty(result.next_key_marker)
        .ok_or_else(|| decode_error("truncated upload listing without NextKeyMarker"))?;
    let next_cursor = UploadCursor::start(bucket, prefix)
        .advance(Some(key_marker), non_empty(result.next_upload_id_marker));

    Ok(Page::truncated(items, next_cursor))
}

/// Decode a `ListPartsResult` body into a page of parts of `cursor`'s upload.
pub fn parse_list_parts_result(
    cursor: &PartCursor,
    body: &[u8],
) -> Result<Page<PartItem, PartCursor>> {
    let result: ListPartsResult = from_xml(body)?;

    let items = result
        .parts
        .into_iter()
        .map(|part| {
            Ok(PartItem {
                part_number: part.part_number,
                last_modified: parse_timestamp(&part.last_modified)?,
                etag: part.etag,
                size: part.size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if !result.is_truncated.unwrap_or(false) {
        return Ok(Page::terminal(items));
    }

    let marker = non_empty(result.next_part_number_marker)
        .ok_or_else(|| decode_error("truncated part listing without NextPartNumberMarker"))?;
    let marker = marker
        .trim()
        .parse::<u32>()
        .map_err(|e| decode_error(format!("invalid NextPartNumberMarker {marker:?}: {e}")))?;

    Ok(Page::truncated(items, cursor.advance(marker)))
}

/// Decode an error response into the matching [`S3mpuError`].
///
/// Bodies without a parsable `<Error>` document (HEAD-style empty bodies,
/// proxies) fall back to a code derived from the status.
pub fn parse_error(status: u16, body: &[u8], kind: RequestKind) -> S3mpuError {
    let response: ErrorResponse = if body.is_empty() {
        ErrorResponse::default()
    } else {
        from_xml(body).unwrap_or_default()
    };

    let code = non_empty(response.code).unwrap_or_else(|| fallback_code(status).to_string());
    let message = non_empty(response.message).unwrap_or_default();

    match kind {
        RequestKind::Listing => S3mpuError::RemoteListing {
            status,
            code,
            message,
        },
        RequestKind::Abort => S3mpuError::RemoteOp {
            status,
            code,
            message,
        },
    }
}

fn fallback_code(status: u16) -> &'static str {
    match status {
        301 => "MovedPermanently",
        307 => "TemporaryRedirect",
        400 => "BadRequest",
        403 => "AccessDenied",
        404 => "NotFound",
        405 => "MethodNotAllowed",
        501 => "MethodNotAllowed",
        _ => "UnknownError",
    }
}
