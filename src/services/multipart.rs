//! src/services/multipart.rs
//!
//! Decoder for `multipart/form-data` request bodies. Works directly on the
//! raw body buffer: parts are located by scanning for the boundary delimiter
//! and sliced out of the shared `Bytes` without copying.
//!
//! Anything malformed degrades to "no candidates" so a broken upload is
//! handled exactly like an empty one.

use crate::models::upload::UploadCandidate;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i);\s*boundary\s*=\s*(?:"([^"]+)"|([^;\s]+))"#)
        .expect("boundary pattern compiles")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedUpload {
    #[error("boundary is empty or longer than 70 characters")]
    InvalidBoundary,
    #[error("opening boundary delimiter not found")]
    MissingOpeningDelimiter,
    #[error("part {0} is not followed by a boundary delimiter")]
    UnterminatedPart(usize),
    #[error("part {0} has no blank line between headers and body")]
    MissingHeaderTerminator(usize),
    #[error("part {0} delimiter line is not terminated by CRLF")]
    BadDelimiterLine(usize),
}

/// Extract the boundary token from a `Content-Type` header value.
///
/// Returns `None` unless the media type is `multipart/form-data` and a
/// boundary parameter is present.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let media_type = content_type.split(';').next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    let caps = BOUNDARY_RE.captures(content_type)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Decode a multipart body into file candidates, in part order.
///
/// Parts without a `filename` (plain form fields, empty file inputs) are
/// skipped. A malformed body yields an empty list.
pub fn decode(body: &Bytes, boundary: &str) -> Vec<UploadCandidate> {
    if body.is_empty() {
        return Vec::new();
    }

    match try_decode(body, boundary) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(
                "discarding malformed multipart body ({} bytes): {}",
                body.len(),
                err
            );
            Vec::new()
        }
    }
}

/// Strict decoder behind [`decode`]; reports why a body was rejected.
pub fn try_decode(body: &Bytes, boundary: &str) -> Result<Vec<UploadCandidate>, MalformedUpload> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MalformedUpload::InvalidBoundary);
    }

    let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();
    // Every delimiter after the first is preceded by the CRLF that ends the previous body.
    let inner_delimiter = [CRLF, delimiter.as_slice()].concat();

    let opening = find(body, &delimiter, 0).ok_or(MalformedUpload::MissingOpeningDelimiter)?;
    let mut cursor = opening + delimiter.len();
    let mut candidates = Vec::new();
    let mut index = 0;

    loop {
        let rest = &body[cursor.min(body.len())..];
        if rest.starts_with(b"--") {
            // Closing delimiter; the epilogue is ignored.
            break;
        }

        // Transport padding is allowed between the delimiter and its CRLF.
        let padding = rest
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        if !rest[padding..].starts_with(CRLF) {
            return Err(MalformedUpload::BadDelimiterLine(index));
        }
        cursor += padding + CRLF.len();

        let end = find(body, &inner_delimiter, cursor).ok_or(MalformedUpload::UnterminatedPart(index))?;
        let part = body.slice(cursor..end);
        if let Some(candidate) = parse_part(&part, index)? {
            candidates.push(candidate);
        }

        cursor = end + inner_delimiter.len();
        index += 1;
    }

    debug!(
        "decoded {} file candidate(s) from {} part(s)",
        candidates.len(),
        index
    );
    Ok(candidates)
}

/// Split one part into headers and body; keep it only if it names a file.
fn parse_part(part: &Bytes, index: usize) -> Result<Option<UploadCandidate>, MalformedUpload> {
    if part.is_empty() {
        return Ok(None);
    }

    let (headers, body) = if part.starts_with(CRLF) {
        // No headers at all.
        (&part[..0], part.slice(CRLF.len()..))
    } else {
        let split = find(part, HEADER_TERMINATOR, 0)
            .ok_or(MalformedUpload::MissingHeaderTerminator(index))?;
        (&part[..split], part.slice(split + HEADER_TERMINATOR.len()..))
    };

    let headers = String::from_utf8_lossy(headers);
    let mut disposition = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value.trim().to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let Some(disposition) = disposition else {
        return Ok(None);
    };
    let params = DispositionParams::parse(&disposition);
    let Some(declared_name) = params.filename() else {
        debug!("part {} has no filename parameter, skipping", index);
        return Ok(None);
    };
    if declared_name.is_empty() {
        // A file input submitted with nothing selected.
        return Ok(None);
    }

    Ok(Some(UploadCandidate {
        declared_name,
        bytes: body,
        field_name: params.get("name").map(str::to_string),
        declared_content_type: content_type,
    }))
}

/// Parameters of a `Content-Disposition` value, names lowercased.
///
/// `;` only separates parameters outside quoted strings, so a quoted value
/// can never smuggle in a parameter of its own.
struct DispositionParams {
    params: Vec<(String, String)>,
}

impl DispositionParams {
    fn parse(disposition: &str) -> Self {
        let mut params = Vec::new();
        // The first segment is the disposition type (`form-data`).
        for segment in split_unquoted(disposition).into_iter().skip(1) {
            let Some((name, value)) = segment.split_once('=') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = match value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
            {
                Some(quoted) => unescape_quoted(quoted),
                None => value.to_string(),
            };
            params.push((name, value));
        }
        Self { params }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `filename*` (RFC 5987) wins over plain `filename` when it decodes.
    fn filename(&self) -> Option<String> {
        self.get("filename*")
            .and_then(decode_ext_value)
            .or_else(|| self.get("filename").map(str::to_string))
    }
}

/// Split on `;` outside double quotes, honouring backslash escapes.
fn split_unquoted(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

/// `charset'language'percent-encoded` → decoded text; `None` if malformed.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    Some(percent_decode_str(encoded).decode_utf8_lossy().into_owned())
}

fn unescape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
